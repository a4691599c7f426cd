// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::env;
use std::f64::consts::PI;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ephyflow::actions::{FnAction, IdentityAction};
use ephyflow::aggregate::{collect_artifacts, gather_template, AggregationPolicy};
use ephyflow::config::{load_config, PipelineConfig, RuntimeBuilder};
use ephyflow::errors::ActionError;
use ephyflow::graph::{Graph, GraphBuilder, InputSlot, Node, SlotType, Value};
use ephyflow::observability::init_tracing;
use ephyflow::observability::messages::engine::ManifestWritten;
use ephyflow::observability::messages::StructuredLog;
use ephyflow::traits::{ActionContext, ActionOutput, Inputs};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <pipeline.yaml|pipeline.toml>", args[0]);
        eprintln!("Example: {} configs/psd-pipeline.yaml", args[0]);
        std::process::exit(1);
    }

    let config = load_config(&args[1]).with_context(|| format!("loading {}", args[1]))?;
    let graph = build_psd_pipeline(&config).context("building the PSD pipeline")?;
    let scheduler = RuntimeBuilder::from_config(&config)?;

    println!("Pipeline '{}': {} nodes, {} workers", config.name, graph.len(), scheduler.workers());
    let record = scheduler.run(graph).await;

    if let Some(path) = &config.manifest {
        record
            .write_manifest(path)
            .with_context(|| format!("writing manifest {}", path.display()))?;
        ManifestWritten { path }.log();
    }
    if let Some(path) = &config.dot {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, record.to_dot()).with_context(|| format!("writing {}", path.display()))?;
    }

    println!();
    print!("{}", record.summary());

    let bands = gather_template(&record, "psd", "band_power", &AggregationPolicy::Labeled)?;
    if let Some(labeled) = bands.as_labeled() {
        println!();
        println!("Band power per recording:");
        for entry in &labeled.entries {
            match &entry.result {
                Ok(value) => println!("  {:<40} {}", entry.label, value),
                Err(error) => println!("  {:<40} {}", entry.label, error),
            }
        }
    }
    if let Some(id) = record.graph().find("group") {
        if let Some(means) = record.output(id, "means") {
            println!();
            println!("Group band means: {}", means);
        }
    }

    let spectra = collect_artifacts(&record, &record.graph().members_of("psd"), ".csv");
    if !spectra.is_empty() {
        println!();
        println!("Spectra:");
        for (label, path) in spectra {
            println!("  {:<40} {}", label, path.display());
        }
    }

    if !record.outcome().is_success() {
        bail!("pipeline '{}' finished with failures", config.name);
    }
    Ok(())
}

/// infosource → load → psd per iteration, band powers gathered into one group node.
fn build_psd_pipeline(config: &PipelineConfig) -> Result<Graph> {
    let space = config.iteration_space();
    let fields: Vec<&str> = config.iterables.iter().map(|i| i.field.as_str()).collect();
    let param = |key: &str, default: Value| config.param(key).unwrap_or(default);

    let mut builder = GraphBuilder::new();

    let infosource = builder.expand(IdentityAction::node("infosource", &fields), &space)?;

    let load = fields
        .iter()
        .fold(Node::new("load", Arc::new(FnAction::new("synthetic_recording", "1", load_recording))), |node, field| {
            node.input(*field, InputSlot::required(SlotType::Any))
        })
        .input("sfreq", InputSlot::required(SlotType::Float))
        .input("n_samples", InputSlot::required(SlotType::Int))
        .output("signal", SlotType::list_of(SlotType::Float))
        .output("sfreq", SlotType::Float)
        .with_literal("sfreq", param("sfreq", Value::Float(250.0)))
        .with_literal("n_samples", param("n_samples", Value::Int(2048)));
    let loads = builder.expand_like(load, &infosource)?;
    for field in &fields {
        builder.connect_zip(&infosource, field, &loads, field)?;
    }

    let psd = Node::new("psd", Arc::new(FnAction::with_context("periodogram", "1", periodogram)))
        .input("signal", InputSlot::required(SlotType::list_of(SlotType::Float)))
        .input("sfreq", InputSlot::required(SlotType::Float))
        .output("band_power", SlotType::map_of(SlotType::Float))
        .with_config("fmin", param("fmin", Value::Float(1.0)))
        .with_config("fmax", param("fmax", Value::Float(40.0)))
        .with_config("bands", param("bands", default_bands()));
    let psds = builder.expand_like(psd, &loads)?;
    builder.connect_zip(&loads, "signal", &psds, "signal")?;
    builder.connect_zip(&loads, "sfreq", &psds, "sfreq")?;

    let group = builder.add_node(
        Node::new("group", Arc::new(FnAction::new("band_means", "1", band_means)))
            .input("band_powers", InputSlot::required(SlotType::list_of(SlotType::map_of(SlotType::Float))))
            .output("means", SlotType::map_of(SlotType::Float)),
    )?;
    builder.connect_gather(&psds, "band_power", group, "band_powers")?;

    Ok(builder.finalize()?)
}

fn default_bands() -> Value {
    let mut bands = BTreeMap::new();
    bands.insert("alpha".to_string(), Value::from(vec![8.0, 13.0]));
    bands.insert("beta".to_string(), Value::from(vec![13.0, 30.0]));
    Value::Map(bands)
}

/// Stand-in for reading a recording: an alpha rhythm plus a subject-specific
/// slow rhythm and deterministic noise, seeded by the iteration values.
fn load_recording(inputs: Inputs) -> Result<ActionOutput, ActionError> {
    let sfreq = inputs.float("sfreq")?;
    let n_samples = usize::try_from(inputs.int("n_samples")?)
        .map_err(|_| ActionError::InvalidInput {
            slot: "n_samples".to_string(),
            expected: "a non-negative sample count".to_string(),
        })?;

    let seed = inputs
        .iter()
        .filter_map(|(_, value)| value.as_str())
        .flat_map(str::bytes)
        .fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    let slow = 4.0 + (seed % 4) as f64;
    let mut state = seed;

    let signal: Vec<f64> = (0..n_samples)
        .map(|n| {
            let t = n as f64 / sfreq;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let noise = ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
            (2.0 * PI * 10.0 * t).sin() + 0.5 * (2.0 * PI * slow * t).sin() + 0.2 * noise
        })
        .collect();

    Ok(ActionOutput::new().with("signal", signal).with("sfreq", sfreq))
}

/// Periodogram between `fmin` and `fmax`, averaged per configured band.
///
/// The spectrum is also written as CSV into the node's working directory.
fn periodogram(inputs: Inputs, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
    let sfreq = inputs.float("sfreq")?;
    let signal: Vec<f64> = inputs.list("signal")?.iter().filter_map(Value::as_float).collect();
    let fmin = ctx.param("fmin").and_then(Value::as_float).unwrap_or(1.0);
    let fmax = ctx.param("fmax").and_then(Value::as_float).unwrap_or(40.0);
    if signal.is_empty() {
        return Err(ActionError::failed("empty signal"));
    }

    let n = signal.len();
    let spectrum: Vec<(f64, f64)> = (0..=n / 2)
        .map(|k| (k as f64 * sfreq / n as f64, k))
        .filter(|(freq, _)| *freq >= fmin && *freq <= fmax)
        .map(|(freq, k)| {
            let (re, im) = signal.iter().enumerate().fold((0.0, 0.0), |(re, im), (i, x)| {
                let angle = 2.0 * PI * (k * i) as f64 / n as f64;
                (re + x * angle.cos(), im - x * angle.sin())
            });
            (freq, (re * re + im * im) / n as f64)
        })
        .collect();

    let mut band_power = BTreeMap::new();
    if let Some(bands) = ctx.param("bands").and_then(Value::as_map) {
        for (band, edges) in bands {
            let (lo, hi) = match edges.as_list() {
                Some([lo, hi]) => (lo.as_float(), hi.as_float()),
                _ => (None, None),
            };
            let (Some(lo), Some(hi)) = (lo, hi) else {
                return Err(ActionError::failed(format!("band '{}' needs [low, high] edges", band)));
            };
            let powers: Vec<f64> = spectrum
                .iter()
                .filter(|(freq, _)| *freq >= lo && *freq < hi)
                .map(|(_, power)| *power)
                .collect();
            if !powers.is_empty() {
                band_power.insert(band.clone(), Value::Float(powers.iter().sum::<f64>() / powers.len() as f64));
            }
        }
    }

    let mut output = ActionOutput::new().with("band_power", Value::Map(band_power));
    if let Some(dir) = ctx.work_dir {
        let mut csv = String::from("frequency,power\n");
        for (freq, power) in &spectrum {
            let _ = writeln!(csv, "{:.4},{:.6}", freq, power);
        }
        let path = dir.join("psd.csv");
        std::fs::write(&path, csv)?;
        output = output.artifact(path);
    }
    Ok(output)
}

/// Mean of every band across the gathered recordings.
fn band_means(inputs: Inputs) -> Result<ActionOutput, ActionError> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for powers in inputs.list("band_powers")? {
        for (band, power) in powers.as_map().into_iter().flatten() {
            if let Some(power) = power.as_float() {
                let slot = sums.entry(band.clone()).or_insert((0.0, 0));
                slot.0 += power;
                slot.1 += 1;
            }
        }
    }

    let means = sums
        .into_iter()
        .map(|(band, (sum, count))| (band, Value::Float(sum / count as f64)))
        .collect();
    Ok(ActionOutput::new().with("means", Value::Map(means)))
}
