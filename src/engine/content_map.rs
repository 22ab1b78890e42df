// ==========================================
// 内容同步系统 - 内容映射
// ==========================================
// 职责: 按 content id 去重的键值缓冲，超过内存阈值的值溢出到临时文件
// 红线: 溢出文件归本次运行独占，任何退出路径都会被删除
// ==========================================

pub mod codec;
mod core;
pub mod error;


pub use codec::{JsonCodec, ValueCodec};
pub use core::{ContentMap, ContentMapBuilder};
pub use error::{ContentMapError, ContentMapResult};
