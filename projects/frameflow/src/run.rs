use crate::cli::{Args, Command};
use crate::engine::sim::SimulatedEngine;
use crate::engine::Engine;
use crate::filter::cpe::CamPoseEstimation;
use crate::filter::drain::DrainPolicy;
use crate::filter::fi::FrameInterpolation;
use crate::filter::pe::ParameterEstimation;
use crate::filter::stb::Stabilization;
use crate::filter::up::Upscaling;
use crate::filter::{FilterContext, VideoFilter};
use crate::frame::FramePool;
use crate::pipeline::runner::{run_stage, FailurePolicy, RunStats};
use crate::pipeline::sink::StatsSink;
use crate::pipeline::source::SyntheticSource;
use crate::pipeline::FrameSource;
use crate::run_report::{write_report, RunReport};
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

/// Applies the command-line overrides on top of a stage's own drain policy.
fn drain_policy(base: DrainPolicy, args: &Args) -> DrainPolicy {
    let mut policy = base;
    if let Some(ms) = args.drain_interval_ms {
        policy = policy.with_interval(Duration::from_millis(ms));
    }
    if let Some(polls) = args.drain_max_stalls {
        policy = policy.with_max_stalled_polls(polls);
    }
    policy
}

fn options_value<T: Serialize>(options: &T) -> Result<serde_json::Value> {
    serde_json::to_value(options).context("Failed to serialize stage options")
}

fn build_stage(args: &Args) -> Result<Option<(Box<dyn VideoFilter>, serde_json::Value)>> {
    let estimation = drain_policy(DrainPolicy::estimation(), args);
    let postflight = drain_policy(DrainPolicy::postflight(), args);
    let stage: (Box<dyn VideoFilter>, serde_json::Value) = match &args.command {
        Command::Models => return Ok(None),
        Command::Cpe(o) => (
            Box::new(CamPoseEstimation::new(o.clone())?.with_drain_policy(estimation)),
            options_value(o)?,
        ),
        Command::Pe(o) => (
            Box::new(ParameterEstimation::new(o.clone())?.with_drain_policy(estimation)),
            options_value(o)?,
        ),
        Command::Fi(o) => (
            Box::new(FrameInterpolation::new(o.clone())?.with_drain_policy(postflight)),
            options_value(o)?,
        ),
        Command::Up(o) => (
            Box::new(Upscaling::new(o.clone())?.with_drain_policy(postflight)),
            options_value(o)?,
        ),
        Command::Stb(o) => (
            Box::new(Stabilization::new(o.clone())?.with_drain_policy(postflight)),
            options_value(o)?,
        ),
    };
    Ok(Some(stage))
}

fn list_models(engine: &SimulatedEngine) {
    println!("Devices:");
    println!("  -2  auto");
    println!("  -1  cpu");
    for device in engine.devices() {
        println!("  {:>2}  {}", device.index, device.name);
    }
    println!("Models:");
    for model in engine.catalog() {
        let scales: Vec<String> = model.scales.iter().map(|s| s.to_string()).collect();
        println!(
            "  {:<8} {:<24} scales {:<8} {}",
            model.name,
            model.model_type.as_str(),
            scales.join(","),
            if model.local { "local" } else { "download" }
        );
    }
}

pub fn run(args: Args) -> Result<()> {
    let engine = SimulatedEngine::new(
        args.gpus as usize,
        Duration::from_millis(args.engine_latency_ms),
    )
    .with_reject_every(args.reject_every);

    let Some((stage, options)) = build_stage(&args)? else {
        list_models(&engine);
        return Ok(());
    };

    let failure_policy = if args.keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    };
    let pool = FramePool::new();
    let mut source = SyntheticSource::new(
        args.width,
        args.height,
        stage.pixel_format(),
        args.input_fps,
        args.frames,
        pool.clone(),
    );
    let input = source.props();
    let (sink, sink_stats) = StatsSink::new(args.dump_dir.clone(), args.dump_limit);
    let mut ctx = FilterContext::new(stage, Box::new(sink), pool.clone());
    let name = ctx.name();

    tracing::info!(
        "Running {} on {} frames of {}x{} at {} fps",
        name,
        args.frames,
        args.width,
        args.height,
        args.input_fps
    );
    let started_at = Utc::now();
    let output = ctx
        .configure(&engine, &input)
        .with_context(|| format!("Failed to configure stage {}", name))?;

    let pb = ProgressBar::new(args.frames);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")?
            .progress_chars("#>-"),
    );

    let outcome = run_stage(&mut ctx, &mut source, failure_policy, Some(&pb));
    let stats = match &outcome {
        Ok(stats) => stats.clone(),
        Err(_) => {
            pb.abandon();
            let partial = ctx.stats();
            RunStats {
                frames_in: partial.frames_in,
                frames_out: partial.frames_out,
                submission_failures: partial.submission_failures,
                reached_eof: partial.eof_sent,
                drain_polls: partial.drain_polls,
                ..RunStats::default()
            }
        }
    };
    let final_state = ctx.state();
    let stream_config = ctx.filter().stream_config().cloned();
    ctx.uninit();

    let sink = sink_stats
        .lock()
        .map_err(|_| anyhow::anyhow!("Sink stats poisoned"))?
        .clone();
    tracing::info!(
        "{}: {} frames in, {} out ({} failed), {}x{} output, {:.1} ms",
        name,
        stats.frames_in,
        sink.frames,
        stats.submission_failures,
        output.width,
        output.height,
        stats.elapsed_ms
    );
    if sink.out_of_order > 0 {
        tracing::warn!("{}: {} frames arrived out of pts order", name, sink.out_of_order);
    }
    if pool.live() > 0 {
        tracing::warn!("{}: {} frames still referenced after teardown", name, pool.live());
    }

    if let Some(path) = &args.report {
        let report = RunReport {
            stage: name.to_string(),
            started_at,
            finished_at: Utc::now(),
            failure_policy,
            input,
            output: Some(output),
            stream_config,
            options,
            final_state,
            stats,
            sink,
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };
        write_report(path, &report)?;
    }

    outcome
        .map(|_| ())
        .with_context(|| format!("Stage {} failed", name))
}
