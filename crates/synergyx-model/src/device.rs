use candle_core::Device;
use tracing::info;

/// Picks the first accelerator compiled in, or the CPU.
pub fn select_device(use_gpu: bool) -> Device {
    if !use_gpu {
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("Training on CUDA device 0");
                return device;
            }
            Err(e) => tracing::debug!("CUDA not available: {}, falling back to CPU", e),
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("Training on Metal device 0");
                return device;
            }
            Err(e) => tracing::debug!("Metal not available: {}, falling back to CPU", e),
        }
    }

    info!("Training on CPU");
    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_when_gpu_disabled() {
        assert!(select_device(false).is_cpu());
    }
}
