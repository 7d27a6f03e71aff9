pub mod cache;
pub mod offline;
pub mod remote;
pub mod storage;
