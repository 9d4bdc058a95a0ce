//! 期望网络
//!
//! - `network`：意图/值期望，arena 与完成状态传播
//! - `branch`：分支（一组期望）及按内容去重的分支表
//! - `entry_point`：意图标签到任务的入口

pub mod branch;
pub mod entry_point;
pub mod network;

pub use branch::{Branch, BranchId, BranchRegistry, Validation};
pub use entry_point::EntryPoint;
pub use network::{Expectation, ExpectationId, ExpectationKind, ExpectationNetwork};
