use eyetrack::source::load_frame;
use eyetrack::{Guess, Tracker, TrackerConfig};
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <eye.png> [config.json] [out.json]", args[0]);
        std::process::exit(2);
    }

    let frame = load_frame(Path::new(&args[1]))?;
    let config = match args.get(2) {
        Some(path) => TrackerConfig::from_json_file(Path::new(path))?,
        None => TrackerConfig::default(),
    };

    let tracker = Tracker::try_with_config(config)?;
    let record = tracker.track(&frame, Some(&Guess::at(0.0, Some(0))))?;

    match (record.pupil_position, record.pupil_radius) {
        (Some(p), Some(r)) => println!("pupil at ({:.2}, {:.2}), radius {r:.2}", p[0], p[1]),
        _ => println!("pupil not found"),
    }
    match (record.cr_position, record.cr_radius) {
        (Some(c), Some(r)) => println!("glint at ({:.2}, {:.2}), radius {r:.2}", c[0], c[1]),
        _ => println!("glint not found"),
    }

    if let Some(out_path) = args.get(3) {
        std::fs::write(out_path, serde_json::to_string_pretty(&*record)?)?;
        println!("Wrote {out_path}");
    }
    Ok(())
}
