//! # 测试框架模块
//!
//! 提供测试工具、fixtures 和测试辅助函数。
//! 依赖 mockall 的 [`mocks`] 需要开启 `testing` 特性。

pub mod fixtures;
pub mod helpers;
#[cfg(any(test, feature = "testing"))]
pub mod mocks;

pub use fixtures::*;
pub use helpers::*;
#[cfg(any(test, feature = "testing"))]
pub use mocks::*;
