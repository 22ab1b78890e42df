use crate::engine::content_map::codec::ValueCodec;
use crate::engine::content_map::error::{ContentMapError, ContentMapResult};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

enum Slot<V> {
    Memory(V),
    Spilled { offset: u64, len: usize },
}

// ==========================================
// SpillStore - 溢出临时文件
// ==========================================
// 独占: 由创建它的运行持有，关闭或析构时删除
struct SpillStore {
    file: NamedTempFile,
    reader: Mutex<File>,
}

impl SpillStore {
    fn read(&self, offset: u64, len: usize) -> ContentMapResult<Vec<u8>> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|e| ContentMapError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ==========================================
// ContentMapBuilder - 增量构造（记录逐条到达时使用）
// ==========================================
// 临时文件在 new 时创建；中途放弃时随 builder 析构删除
pub struct ContentMapBuilder<V, C> {
    codec: C,
    memory_threshold: usize,
    file: NamedTempFile,
    writer: BufWriter<File>,
    offset: u64,
    slots: Vec<Slot<V>>,
    order: Vec<String>,
    index: HashMap<String, usize>,
    duplicates: HashMap<String, Vec<usize>>,
    duplicate_order: Vec<String>,
    memory_entries: usize,
}

impl<V, C> ContentMapBuilder<V, C>
where
    V: Clone,
    C: ValueCodec<V>,
{
    pub fn new(spill_dir: &Path, memory_threshold: usize, codec: C) -> ContentMapResult<Self> {
        let file = tempfile::Builder::new()
            .prefix("content-map-")
            .suffix(".jsonl")
            .tempfile_in(spill_dir)?;
        let writer = BufWriter::new(file.reopen()?);
        Ok(Self {
            codec,
            memory_threshold,
            file,
            writer,
            offset: 0,
            slots: Vec::new(),
            order: Vec::new(),
            index: HashMap::new(),
            duplicates: HashMap::new(),
            duplicate_order: Vec::new(),
            memory_entries: 0,
        })
    }

    /// 追加一个 (键, 值)；重复键的值同样保留
    pub fn insert(&mut self, key: String, value: V) -> ContentMapResult<()> {
        let slot = if self.memory_entries < self.memory_threshold {
            self.memory_entries += 1;
            Slot::Memory(value)
        } else {
            let bytes = self.codec.encode(&value)?;
            self.writer.write_all(&bytes)?;
            self.writer.write_all(b"\n")?;
            let slot = Slot::Spilled {
                offset: self.offset,
                len: bytes.len(),
            };
            self.offset += bytes.len() as u64 + 1;
            slot
        };

        let slot_id = self.slots.len();
        self.slots.push(slot);

        match self.index.get(&key).copied() {
            None => {
                self.index.insert(key.clone(), slot_id);
                self.order.push(key);
            }
            Some(first) => {
                let duplicate_order = &mut self.duplicate_order;
                let all = self.duplicates.entry(key.clone()).or_insert_with(|| {
                    duplicate_order.push(key.clone());
                    vec![first]
                });
                all.push(slot_id);
            }
        }
        Ok(())
    }

    /// 已追加的值个数（含重复）
    pub fn total_entries(&self) -> usize {
        self.slots.len()
    }

    /// 结束写入，转为只读映射
    pub fn finish(self) -> ContentMapResult<ContentMap<V, C>> {
        let Self {
            codec,
            file,
            mut writer,
            slots,
            order,
            index,
            duplicates,
            duplicate_order,
            memory_entries,
            ..
        } = self;

        writer.flush()?;
        drop(writer);
        let reader = Mutex::new(file.reopen()?);

        debug!(
            keys = order.len(),
            total = slots.len(),
            spilled = slots.len() - memory_entries,
            duplicate_keys = duplicate_order.len(),
            "内容映射构造完成"
        );

        Ok(ContentMap {
            codec,
            slots,
            order,
            index,
            duplicates,
            duplicate_order,
            memory_entries,
            spill: SpillStore { file, reader },
        })
    }
}

// ==========================================
// ContentMap - 去重/可溢出的键值缓冲
// ==========================================
// 构造时单次追加，之后只读、可多次遍历
// 重复键: 全部值保留（duplicates），get/stream 只暴露首次出现的代表值
pub struct ContentMap<V, C> {
    codec: C,
    slots: Vec<Slot<V>>,                       // 全部值，按到达顺序
    order: Vec<String>,                        // 键的首次出现顺序
    index: HashMap<String, usize>,             // 键 → 代表值槽位
    duplicates: HashMap<String, Vec<usize>>,   // 重复键 → 全部槽位（含首次）
    duplicate_order: Vec<String>,              // 重复键，按成为重复的先后
    memory_entries: usize,
    spill: SpillStore,
}

impl<V, C> ContentMap<V, C>
where
    V: Clone,
    C: ValueCodec<V>,
{
    /// 构造内容映射
    ///
    /// # 参数
    /// - entries: (键, 值) 序列，单次消费
    /// - spill_dir: 溢出临时文件目录
    /// - memory_threshold: 驻留内存的值个数上限，超过后写入溢出文件
    /// - codec: 溢出值编解码
    ///
    /// # 返回
    /// - Err(Io): 目录不可写 / 写入失败
    /// - Err(Codec): 编码失败
    pub fn build<I>(
        entries: I,
        spill_dir: &Path,
        memory_threshold: usize,
        codec: C,
    ) -> ContentMapResult<Self>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut builder = ContentMapBuilder::new(spill_dir, memory_threshold, codec)?;
        for (key, value) in entries {
            builder.insert(key, value)?;
        }
        builder.finish()
    }

    fn load(&self, slot_id: usize) -> ContentMapResult<V> {
        match &self.slots[slot_id] {
            Slot::Memory(value) => Ok(value.clone()),
            Slot::Spilled { offset, len } => {
                let bytes = self.spill.read(*offset, *len)?;
                self.codec.decode(&bytes)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 不同键的个数
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// 键集合，按首次出现顺序
    pub fn key_set(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    /// 取代表值（首次出现的值）
    pub fn get(&self, key: &str) -> ContentMapResult<Option<V>> {
        match self.index.get(key) {
            Some(&slot_id) => self.load(slot_id).map(Some),
            None => Ok(None),
        }
    }

    /// 惰性遍历代表值，可重复调用
    pub fn stream(&self) -> impl Iterator<Item = ContentMapResult<V>> + '_ {
        self.order.iter().map(move |key| self.load(self.index[key]))
    }

    pub fn has_duplicates(&self) -> bool {
        !self.duplicate_order.is_empty()
    }

    /// 重复键的全部值（含首次出现），按到达顺序
    pub fn duplicates(&self) -> ContentMapResult<Vec<(String, Vec<V>)>> {
        self.duplicate_order
            .iter()
            .map(|key| {
                let values = self.duplicates[key]
                    .iter()
                    .map(|&slot_id| self.load(slot_id))
                    .collect::<ContentMapResult<Vec<V>>>()?;
                Ok((key.clone(), values))
            })
            .collect()
    }

    /// 被重复键多出来的值个数（len + extra == total）
    pub fn extra_duplicate_count(&self) -> usize {
        self.slots.len() - self.order.len()
    }

    pub fn total_entries(&self) -> usize {
        self.slots.len()
    }

    pub fn spilled_entries(&self) -> usize {
        self.slots.len() - self.memory_entries
    }

    pub fn spill_path(&self) -> &Path {
        self.spill.file.path()
    }

    /// 关闭并删除溢出文件
    pub fn close(self) -> ContentMapResult<()> {
        let SpillStore { file, reader } = self.spill;
        drop(reader);
        file.close()?;
        Ok(())
    }
}
