//! GPU Tron 靓号地址搜索系统 - Rust + OpenCL 实现
//!
//! 把目标地址编译为定宽匹配模式，在一个或多个计算设备上并行暴力搜索私钥，
//! 前缀/后缀满足要求的地址连同私钥一起交给结果汇聚点。

pub mod address;
pub mod api;
pub mod config;
pub mod cpu;
pub mod curve;
pub mod device;
pub mod engine;
pub mod error;
pub mod kernel_loader;
pub mod keyspace;
pub mod opencl;
pub mod pattern;
pub mod sink;

pub use address::CandidateAddress;
pub use api::{
    Backend, MatchTarget, PreparedSearch, SearchRequest, SearchResponse, prepare_search, search,
};
pub use config::{BatchSizing, MatchCriteria, MatchWindow, TerminationPolicy};
pub use cpu::CpuDevice;
pub use device::{ComputeDevice, DeviceHit, WorkSize};
pub use engine::{EngineState, SearchControl, SearchEngine, SearchSummary};
pub use error::SearchError;
pub use kernel_loader::load_kernel_source;
pub use opencl::{OpenClDevice, ProgramCache};
pub use pattern::{MatchPattern, PatternSet, Score};
pub use sink::{Match, ResultSink, Retention, SinkReport};
