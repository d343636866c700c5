use anyhow::{bail, Context, Result};
use crabcapture::testing::{
    synthetic_back_camera, synthetic_front_camera, HalCall, ListenerEvent, RecordingListener,
    RecordingSink, SimulatedHardware, TestSurface,
};
use crabcapture::{
    CameraControl, CaptureFacade, CrabCaptureConfig, Facing, FramePipelineBridge, Size,
};
use serde_json::{json, Value};
use std::env;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    crabcapture::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabcapture-cli <list-devices|simulate> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&args),
        "simulate" => cmd_simulate(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn simulated_devices() -> Vec<crabcapture::DeviceDescriptor> {
    vec![synthetic_back_camera(), synthetic_front_camera()]
}

fn cmd_list_devices(args: &[String]) -> Result<()> {
    #[cfg(feature = "native")]
    let devices = if args.contains(&"--native".to_string()) {
        crabcapture::platform::native::list_native_devices()?
    } else {
        simulated_devices()
    };
    #[cfg(not(feature = "native"))]
    let devices = simulated_devices();

    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            let sizes: Vec<String> = d.output_sizes.iter().map(|s| s.to_string()).collect();
            println!(
                "{}: {} facing, sensor {} degrees, zoom {}x-{}x, flash {}, sizes [{}]",
                d.id,
                d.facing,
                d.sensor_orientation.degrees(),
                d.zoom_range.min,
                d.zoom_range.max,
                if d.flash_available { "yes" } else { "no" },
                sizes.join(", ")
            );
        }
    }
    Ok(())
}

struct SimulateArgs {
    facing: Facing,
    size: Size,
    surface: Option<Size>,
    zoom: Option<f32>,
    torch: bool,
    focus: bool,
    json: bool,
}

fn parse_size(value: &str) -> Result<Size> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("size must look like WxH, got {}", value))?;
    Ok(Size::new(w.parse::<u32>()?, h.parse::<u32>()?))
}

fn next_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i) {
        Some(value) => Ok(value.as_str()),
        None => bail!("{} needs a value", flag),
    }
}

fn parse_simulate_args(args: &[String]) -> Result<SimulateArgs> {
    let defaults = CrabCaptureConfig::default();
    let mut parsed = SimulateArgs {
        facing: defaults.camera.default_facing,
        size: defaults.camera.default_size(),
        surface: None,
        zoom: None,
        torch: false,
        focus: false,
        json: false,
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--facing" => {
                i += 1;
                parsed.facing = next_value(args, i, "--facing")?
                    .parse::<Facing>()
                    .map_err(anyhow::Error::msg)?;
            }
            "--size" => {
                i += 1;
                parsed.size = parse_size(next_value(args, i, "--size")?)?;
            }
            "--surface" => {
                i += 1;
                parsed.surface = Some(parse_size(next_value(args, i, "--surface")?)?);
            }
            "--zoom" => {
                i += 1;
                parsed.zoom = Some(next_value(args, i, "--zoom")?.parse::<f32>()?);
            }
            "--torch" => parsed.torch = true,
            "--focus" => parsed.focus = true,
            "--json" => parsed.json = true,
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }
    Ok(parsed)
}

fn cmd_simulate(args: &[String]) -> Result<()> {
    let opts = parse_simulate_args(args)?;

    let hardware = Arc::new(SimulatedHardware::new(simulated_devices()));
    let listener = Arc::new(RecordingListener::default());
    let sink = Arc::new(RecordingSink::default());
    let bridge = Arc::new(FramePipelineBridge::new(
        Arc::new(TestSurface::default()),
        sink.clone(),
    ));
    if let Some(surface) = opts.surface {
        bridge.on_surface_changed(surface);
    }

    let camera = CaptureFacade::new(
        hardware.clone(),
        bridge,
        listener.clone(),
        CrabCaptureConfig::default(),
    )?;

    camera.open(opts.facing, opts.size.width, opts.size.height);
    if listener.wait_for_events(1, WAIT).is_empty() {
        bail!("camera did not open within {:?}", WAIT);
    }

    if let Some(ratio) = opts.zoom {
        camera.set_zoom_ratio(ratio);
    }
    if opts.torch {
        camera.enable_torch(true);
    }
    if opts.focus {
        camera.start_focus_and_metering_center();
    }
    camera.flush(WAIT);
    let snapshot = camera.snapshot();
    camera.close();

    let events = listener.events();
    let geometries = sink.geometries();
    let journal = hardware.journal();

    if opts.json {
        let report = json!({
            "snapshot": snapshot,
            "events": events.iter().map(event_label).collect::<Vec<_>>(),
            "geometries": geometries,
            "hal_calls": journal.iter().map(hal_call_json).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} camera, stream {}, zoom {}x ({}x-{}x)",
            snapshot.facing.map_or("no", |f| f.as_str()),
            snapshot
                .stream_size
                .map_or_else(|| "unknown".to_string(), |s| s.to_string()),
            snapshot.zoom_ratio,
            snapshot.zoom_range.min,
            snapshot.zoom_range.max
        );
        for event in &events {
            println!("event: {}", event_label(event));
        }
        for geometry in &geometries {
            println!(
                "geometry: surface {} frame {} rotate {} front {}",
                geometry.surface,
                geometry.frame,
                geometry.rotation_degrees(),
                geometry.front_facing
            );
        }
        for call in &journal {
            println!("hal: {}", hal_call_json(call));
        }
    }

    Ok(())
}

fn event_label(event: &ListenerEvent) -> String {
    match event {
        ListenerEvent::Opened => "opened".to_string(),
        ListenerEvent::Closed => "closed".to_string(),
        ListenerEvent::Error(e) => format!("error: {}", e),
    }
}

fn hal_call_json(call: &HalCall) -> Value {
    match call {
        HalCall::OpenDevice(id) => json!({ "call": "open_device", "device": id }),
        HalCall::CreateSession => json!({ "call": "create_session" }),
        HalCall::SetRepeating(request) => json!({ "call": "set_repeating", "request": request }),
        HalCall::Capture(request) => json!({ "call": "capture", "request": request }),
        HalCall::StopRepeating => json!({ "call": "stop_repeating" }),
        HalCall::CloseSession => json!({ "call": "close_session" }),
        HalCall::CloseDevice(id) => json!({ "call": "close_device", "device": id }),
    }
}
