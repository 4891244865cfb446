//! 基础设施：持久化协作方的实现

pub mod file_repository;

pub use file_repository::{EntityDefinitions, FileEntityRepository};
