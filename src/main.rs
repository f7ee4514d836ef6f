//! Standalone CLI for exercising the timeline engine
//!
//! Run with: cargo run --bin eventline-cli -- person.json [dictionary.json]

use std::fs;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use eventline::{Dictionary, EventClusterer, PersonRecord, Rect, Scene, XMode, YMode};

struct Args {
    person: String,
    dictionary: Option<String>,
    cluster: bool,
    x_mode: XMode,
    y_mode: YMode,
}

const USAGE: &str = "usage: eventline-cli <person.json> [dictionary.json] \
    [--cluster] [--x-mode=time|sequence|stacked] \
    [--y-mode=first|last|group-first|group-last]";

fn parse_args() -> Result<Args, String> {
    let mut person = None;
    let mut dictionary = None;
    let mut cluster = false;
    let mut x_mode = XMode::default();
    let mut y_mode = YMode::default();
    for arg in std::env::args().skip(1) {
        if arg == "--cluster" {
            cluster = true;
        } else if let Some(mode) = arg.strip_prefix("--x-mode=") {
            x_mode = match mode {
                "time" => XMode::Time,
                "sequence" => XMode::Sequence,
                "stacked" => XMode::Stacked,
                other => return Err(format!("unknown x mode: {other}")),
            };
        } else if let Some(mode) = arg.strip_prefix("--y-mode=") {
            y_mode = match mode {
                "first" => YMode::FirstEvent,
                "last" => YMode::LastEvent,
                "group-first" => YMode::GroupFirst,
                "group-last" => YMode::GroupLast,
                other => return Err(format!("unknown y mode: {other}")),
            };
        } else if arg.starts_with("--") {
            return Err(format!("unknown flag: {arg}"));
        } else if person.is_none() {
            person = Some(arg);
        } else if dictionary.is_none() {
            dictionary = Some(arg);
        } else {
            return Err(format!("unexpected argument: {arg}"));
        }
    }
    match person {
        Some(person) => Ok(Args { person, dictionary, cluster, x_mode, y_mode }),
        None => Err(USAGE.to_string()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eventline=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = parse_args()?;

    let person: PersonRecord = serde_json::from_str(&fs::read_to_string(&args.person)?)?;
    // A dictionary embedded in the document wins over a separate file.
    let dictionary: Dictionary = match (&person.dictionary, &args.dictionary) {
        (Some(embedded), _) => embedded.clone(),
        (None, Some(path)) => serde_json::from_str(&fs::read_to_string(path)?)?,
        (None, None) => Dictionary::new(),
    };

    let mut scene = Scene::new(8.0, 8.0);
    info!(file = %args.person, "loading person");
    if !scene.load_person(&person, &dictionary) {
        return Err("person data is missing its time bounds".into());
    }

    scene.pool_mut().set_x_mode(args.x_mode);
    scene.pool_mut().set_y_mode(args.y_mode);
    scene.pool_mut().flush();

    if args.cluster {
        let mut clusterer = EventClusterer::new();
        scene.run_clustering(&mut clusterer);
    }

    // One full-content viewport pass to exercise label placement.
    let (w, h) = scene.pool().content_box();
    let view = Rect::new(0.0, 0.0, w, h);
    scene.on_viewport_change(view, view, 1.0, false);

    let pool = scene.pool();
    let (start, end) = pool.range_time();
    info!(
        events = pool.event_count(),
        types = pool.total_distinct_type_count(),
        rows = pool.display_types().len(),
        start,
        end,
        min_time_diff = pool.min_time_diff(),
        labels = scene.labels().placements().len(),
        "layout complete"
    );
    let histogram = pool.cost_histogram();
    if !histogram.is_empty() {
        let total: f64 = histogram.iter().map(|(_, c)| c).sum();
        info!(buckets = histogram.len(), total, "cost histogram");
    }
    Ok(())
}
