//! 日志宏
//!
//! 统一从这里引入，库代码不直接使用 `println!`。

pub use rat_logger::{debug, error, info, warn};
