//! OpenCL GPU 计算模块

pub mod cache;
pub mod context;
pub mod kernel;

pub use cache::ProgramCache;
pub use context::{DeviceKind, OpenClTarget, enumerate_devices, platform_contexts, select_devices};
pub use kernel::OpenClDevice;
