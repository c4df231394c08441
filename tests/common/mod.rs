//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
#![allow(dead_code)]
use std::sync::Arc;

use zangfx_d3d12::device::{Device, DeviceRef};
use zangfx_d3d12::limits::DeviceConfig;
use zangfx_d3d12::null::NullDevice;

/// Route the crate's log output to the test harness. Set `RUST_LOG` to see
/// it.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn device_with_config(config: DeviceConfig) -> (Arc<NullDevice>, DeviceRef) {
    init_logging();
    let null = Arc::new(NullDevice::new());
    let device = Device::new(null.clone(), config).unwrap();
    (null, device)
}

pub fn device() -> (Arc<NullDevice>, DeviceRef) {
    device_with_config(DeviceConfig::default())
}
