//! OpenCL 设备枚举与上下文管理

use std::collections::BTreeMap;
use std::fmt;

use log::{info, warn};
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::flags::DeviceType;
use ocl::{Context, Device, Platform};
use sha2::{Digest, Sha256};

/// 设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Gpu,
    Cpu,
    Accelerator,
    Other,
}

impl DeviceKind {
    fn of(device: &Device) -> Self {
        match device.info(DeviceInfo::Type) {
            Ok(DeviceInfoResult::Type(t)) if t.contains(DeviceType::GPU) => DeviceKind::Gpu,
            Ok(DeviceInfoResult::Type(t)) if t.contains(DeviceType::ACCELERATOR) => {
                DeviceKind::Accelerator
            }
            Ok(DeviceInfoResult::Type(t)) if t.contains(DeviceType::CPU) => DeviceKind::Cpu,
            _ => DeviceKind::Other,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Gpu => "GPU",
            DeviceKind::Cpu => "CPU",
            DeviceKind::Accelerator => "ACCELERATOR",
            DeviceKind::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// 稳定的设备标识，用作程序缓存文件名的一部分
///
/// 同一台机器上同一设备在多次运行之间保持不变。
pub fn device_identity(
    platform_name: &str,
    device_name: &str,
    vendor: &str,
    driver_version: &str,
    index: usize,
) -> String {
    let mut hasher = Sha256::new();
    for part in [platform_name, device_name, vendor, driver_version] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update((index as u64).to_le_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// 一个枚举到的 OpenCL 设备
#[derive(Debug, Clone)]
pub struct OpenClTarget {
    /// 跨所有平台的全局序号 (--skip 使用)
    pub index: usize,
    pub platform_index: usize,
    pub platform: Platform,
    pub device: Device,
    pub name: String,
    pub kind: DeviceKind,
    pub identity: String,
}

/// 枚举所有平台上的全部设备
pub fn enumerate_devices() -> anyhow::Result<Vec<OpenClTarget>> {
    let platforms = Platform::list();
    if platforms.is_empty() {
        anyhow::bail!("No OpenCL platforms found");
    }
    info!("Found {} OpenCL platform(s)", platforms.len());

    let mut targets = Vec::new();
    for (platform_index, platform) in platforms.iter().enumerate() {
        let platform_name = platform.name().unwrap_or_default();
        let devices = match Device::list_all(platform) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Platform {} 设备枚举失败: {}", platform_name, e);
                continue;
            }
        };
        info!("Platform: {}, Devices: {}", platform_name, devices.len());

        for device in devices {
            let index = targets.len();
            let name = device.name().unwrap_or_else(|_| String::from("<unknown>"));
            let vendor = device.vendor().unwrap_or_default();
            let driver = device
                .info(DeviceInfo::DriverVersion)
                .map(|v| v.to_string())
                .unwrap_or_default();
            let kind = DeviceKind::of(&device);
            let identity = device_identity(&platform_name, &name, &vendor, &driver, index);
            info!("  Device {}: {} (Type: {}, id {})", index, name, kind, identity);

            targets.push(OpenClTarget {
                index,
                platform_index,
                platform: *platform,
                device,
                name,
                kind,
                identity,
            });
        }
    }
    Ok(targets)
}

/// 选出参与搜索的设备: 优先 GPU，跳过 `skip` 中的序号
///
/// 没有 GPU 时退回到全部设备。
pub fn select_devices(targets: Vec<OpenClTarget>, skip: &[usize]) -> Vec<OpenClTarget> {
    let has_gpu = targets.iter().any(|t| t.kind == DeviceKind::Gpu);
    if !has_gpu {
        info!("No GPU found, using all available devices");
    }
    targets
        .into_iter()
        .filter(|t| !has_gpu || t.kind == DeviceKind::Gpu)
        .filter(|t| {
            let skipped = skip.contains(&t.index);
            if skipped {
                info!("  Skipping device {}: {}", t.index, t.name);
            }
            !skipped
        })
        .collect()
}

/// 每个平台一个上下文，上下文不能跨平台
pub fn platform_contexts(targets: &[OpenClTarget]) -> BTreeMap<usize, anyhow::Result<Context>> {
    let mut grouped: BTreeMap<usize, (Platform, Vec<Device>)> = BTreeMap::new();
    for target in targets {
        grouped
            .entry(target.platform_index)
            .or_insert_with(|| (target.platform, Vec::new()))
            .1
            .push(target.device);
    }

    grouped
        .into_iter()
        .map(|(platform_index, (platform, devices))| {
            let context = Context::builder()
                .platform(platform)
                .devices(&devices)
                .build()
                .map_err(anyhow::Error::from);
            (platform_index, context)
        })
        .collect()
}
