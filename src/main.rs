mod cli;
mod cycles;
mod discovery;
mod error;
mod export;
mod frame;
mod recording;
mod sampler;
mod source;
mod stats;
mod tui;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use recording::reader::Recording;
use recording::replay::ReplaySource;
use recording::writer::RecordingWriter;
use sampler::{LiveSource, SourceState};
use source::StatSource;
use tui::AnySource;

fn main() {
    env_logger::init();

    use clap::Parser;
    let opt = cli::Opt::parse();
    match opt.action {
        cli::Action::Top(args) => do_top_action(args),
        cli::Action::Record(args) => do_record_action(args),
        cli::Action::Replay(args) => do_replay_action(args),
        cli::Action::Export(args) => do_export_action(args),
        cli::Action::List => do_list_action(),
    }
}

fn do_top_action(args: cli::TopArgs) {
    let pid = resolve_pid(args.pid);
    let mut source = attach(pid, args.interval);

    if let Some(path) = &args.record {
        match RecordingWriter::create(path, source.metadata()) {
            Ok(writer) => source.set_recorder(writer),
            Err(err) => {
                eprintln!("Could not create recording {}: {err}", path.display());
                std::process::exit(1)
            }
        }
    }

    if let Err(err) = tui::run(AnySource::Live(source)) {
        eprintln!("Terminal error: {err}");
        std::process::exit(1)
    }
}

fn do_record_action(args: cli::RecordArgs) {
    let pid = resolve_pid(args.pid);
    let mut source = attach(pid, args.interval);

    match RecordingWriter::create(&args.output, source.metadata()) {
        Ok(writer) => source.set_recorder(writer),
        Err(err) => {
            eprintln!("Could not create recording {}: {err}", args.output.display());
            std::process::exit(1)
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(err) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            eprintln!("Could not install Ctrl+C handler: {err}");
            std::process::exit(1)
        }
    }

    eprintln!(
        "Recording pid {pid} to {} until Ctrl+C...",
        args.output.display()
    );

    let started = Instant::now();
    let mut frames_written: u64 = 0;
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if let Some(limit) = args.duration {
            if started.elapsed().as_secs_f64() >= limit {
                break;
            }
        }
        match source.next_frame() {
            Some(_) => frames_written += 1,
            None => {
                if source.state() != SourceState::Running {
                    eprintln!("Target exited.");
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    source.stop_recording();
    eprintln!("Wrote {frames_written} frame(s) to {}", args.output.display());
}

fn do_replay_action(args: cli::ReplayArgs) {
    let replay = match ReplaySource::open(&args.file) {
        Ok(replay) => replay,
        Err(err) => {
            eprintln!("Could not open {}: {err}", args.file.display());
            std::process::exit(1)
        }
    };
    if replay.truncated() {
        eprintln!("Note: the recording is truncated; playing the readable prefix.");
    }
    if let Err(err) = tui::run(AnySource::Replay(replay)) {
        eprintln!("Terminal error: {err}");
        std::process::exit(1)
    }
}

fn do_export_action(args: cli::ExportArgs) {
    let recording = match Recording::open(&args.file) {
        Ok(recording) => recording,
        Err(err) => {
            eprintln!("Could not open {}: {err}", args.file.display());
            std::process::exit(1)
        }
    };

    let result = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => {
                let mut out = BufWriter::new(file);
                export::export_csv(&mut out, &recording.frames).and_then(|_| out.flush())
            }
            Err(err) => {
                eprintln!("Could not create {}: {err}", path.display());
                std::process::exit(1)
            }
        },
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            export::export_csv(&mut out, &recording.frames)
        }
    };

    if let Err(err) = result {
        eprintln!("CSV export failed: {err}");
        std::process::exit(1)
    }
    eprintln!("Exported {} frame(s).", recording.frames.len());
}

fn do_list_action() {
    let processes = discovery::discover();
    if processes.is_empty() {
        eprintln!("No running processes publish FEX statistics.");
        return;
    }
    println!("{:>8}  {:<18}  {:<12}  {}", "PID", "COMM", "APP", "FEX VERSION");
    for process in processes {
        println!(
            "{:>8}  {:<18}  {:<12}  {}",
            process.pid,
            process.comm,
            process
                .app_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_owned()),
            process.fex_version.as_deref().unwrap_or("?"),
        );
    }
}

fn attach(pid: u32, interval: Duration) -> LiveSource {
    match LiveSource::attach(pid, interval) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not attach to pid {pid}: {err}");
            std::process::exit(1)
        }
    }
}

fn resolve_pid(requested: Option<u32>) -> u32 {
    if let Some(pid) = requested {
        return pid;
    }
    let candidates = discovery::discover();
    match candidates.as_slice() {
        [] => {
            eprintln!("No running processes publish FEX statistics.");
            eprintln!("Start a guest under FEX with profiling enabled, or pass -p <pid>.");
            std::process::exit(1)
        }
        [only] => {
            eprintln!("Observing pid {} ({})", only.pid, only.comm);
            only.pid
        }
        many => {
            eprintln!("Multiple candidates; pick one with -p <pid>:");
            for process in many {
                eprintln!("  {:>8}  {}", process.pid, process.comm);
            }
            std::process::exit(1)
        }
    }
}
