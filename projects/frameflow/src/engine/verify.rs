// Checks run against the engine catalog before a processor is created
//
// Everything here fails at configuration time, so an error aborts stream setup
// instead of surfacing on the first frame.

use super::{Engine, EngineError, ModelDescriptor, ModelType, ProcessorHandle, ProcessorInfo};
use crate::config::StreamConfig;
use crate::error::{FilterError, Result};
use crate::pipeline::LinkProps;
use tracing::level_filters::LevelFilter;

/// Device selector meaning "pick automatically".
pub const DEVICE_AUTO: i32 = -2;
/// Device selector meaning "run on the CPU".
pub const DEVICE_CPU: i32 = -1;

pub fn handle_logging(engine: &dyn Engine) {
    engine.set_logging(LevelFilter::current() >= LevelFilter::DEBUG);
}

pub fn check_model(
    engine: &dyn Engine,
    model_type: ModelType,
    model: &str,
) -> std::result::Result<ModelDescriptor, EngineError> {
    engine
        .models(model_type)
        .into_iter()
        .find(|m| m.name == model)
        .ok_or_else(|| EngineError::UnknownModel {
            model: model.to_string(),
            model_type,
        })
}

/// Valid selectors are auto, CPU, a GPU index, or the GPU count ("all GPUs").
pub fn check_device(engine: &dyn Engine, index: i32) -> std::result::Result<(), EngineError> {
    let available = engine.devices().len();
    if index < DEVICE_AUTO || index as i64 > available as i64 {
        return Err(EngineError::InvalidDevice { index, available });
    }
    Ok(())
}

pub fn check_scale(model: &ModelDescriptor, scale: u32) -> std::result::Result<(), EngineError> {
    if model.scales.contains(&scale) {
        Ok(())
    } else {
        Err(EngineError::InvalidScale {
            model: model.name.clone(),
            scale,
            allowed: model.scales.clone(),
        })
    }
}

fn check_download(model: &ModelDescriptor, can_download: bool) -> std::result::Result<(), EngineError> {
    if model.local || can_download {
        Ok(())
    } else {
        Err(EngineError::DownloadDenied(model.name.clone()))
    }
}

/// Validates `config` and derives the processor info and output link.
pub fn verify_and_set_info(
    engine: &dyn Engine,
    config: &StreamConfig,
    inlink: &LinkProps,
) -> Result<(ProcessorInfo, LinkProps)> {
    handle_logging(engine);

    let model = check_model(engine, config.model_type, &config.model).map_err(FilterError::Create)?;
    check_device(engine, config.device).map_err(FilterError::Create)?;
    check_scale(&model, config.scale).map_err(FilterError::Create)?;
    check_download(&model, config.can_download).map_err(FilterError::Create)?;

    let info = ProcessorInfo {
        processor_name: engine.processor_name(&model.name, config.processor_index),
        processor_index: config.processor_index,
        model_name: model.name.clone(),
        model_type: config.model_type,
        scale: config.scale,
        device: config.device,
        extra_threads: config.extra_instances,
        vram_fraction: config.vram,
        can_download_model: config.can_download,
        input_width: inlink.width,
        input_height: inlink.height,
        input_format: inlink.format,
        timebase: inlink.time_base.to_f64(),
        framerate: inlink.frame_rate.to_f64(),
        frame_count: config.frame_count,
        model_parameters: config.params.values(),
        options: config.params.options(),
    };

    let outlink = LinkProps {
        width: inlink.width * config.scale,
        height: inlink.height * config.scale,
        ..inlink.clone()
    };

    tracing::info!(
        "{}: {} on device {} ({}x{} -> {}x{})",
        info.processor_name,
        config.model_type,
        config.device,
        inlink.width,
        inlink.height,
        outlink.width,
        outlink.height
    );

    Ok((info, outlink))
}

pub fn verify_and_create(
    engine: &dyn Engine,
    config: &StreamConfig,
    inlink: &LinkProps,
) -> Result<(ProcessorHandle, LinkProps)> {
    let (info, outlink) = verify_and_set_info(engine, config, inlink)?;
    let processor = engine.create(&info).map_err(FilterError::Create)?;
    Ok((ProcessorHandle::new(processor, info.processor_name), outlink))
}
