use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ddupl_grab::{BufferFormat, DuplGrabber, GrabStatus, GrabbedScreen, foreground_window};
use tracing_subscriber::EnvFilter;

const CYCLES: usize = 120;
const CYCLE_INTERVAL: Duration = Duration::from_millis(33);

/// Mean color of a grabbed buffer as (r, g, b).
fn average_color(screen: &GrabbedScreen) -> Option<(u8, u8, u8)> {
    let data = screen.data()?;
    let width = screen.bytes_per_row() / 4;
    let (mut r, mut g, mut b, mut count) = (0u64, 0u64, 0u64, 0u64);
    for row in data.chunks_exact(screen.bytes_per_row()) {
        for pixel in row.chunks_exact(4).take(width) {
            let (pr, pg, pb) = match screen.format() {
                BufferFormat::Argb => (pixel[2], pixel[1], pixel[0]),
                BufferFormat::Abgr => (pixel[0], pixel[1], pixel[2]),
                BufferFormat::Unknown => return None,
            };
            r += u64::from(pr);
            g += u64::from(pg);
            b += u64::from(pb);
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some(((r / count) as u8, (g / count) as u8, (b / count) as u8))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let window = foreground_window().context("no foreground window")?;
    println!("Sampling the screen under window {:#x}", window.raw_handle());

    let mut grabber = DuplGrabber::new().context("failed to create grabber")?;
    let mut stats = (0usize, 0usize, 0usize);

    for cycle in 0..CYCLES {
        let begin = Instant::now();
        let screens = grabber.screens_with_widgets(&[window]);
        if grabber.is_reallocation_needed(&screens) {
            let outcome = grabber.reallocate(&screens);
            println!("cycle {cycle}: reallocated {} screen(s): {outcome:?}", screens.len());
        }

        match grabber.grab_screens() {
            GrabStatus::Ok => {
                stats.0 += 1;
                for screen in grabber.screens() {
                    if let Some((r, g, b)) = average_color(screen) {
                        println!(
                            "cycle {cycle}: {} avg #{r:02x}{g:02x}{b:02x} ({} rows, rotation {})",
                            screen.screen_info(),
                            screen.rows(),
                            screen.rotation(),
                        );
                    }
                }
            }
            GrabStatus::FrameNotReady => stats.1 += 1,
            GrabStatus::Error => stats.2 += 1,
        }

        thread::sleep(CYCLE_INTERVAL.saturating_sub(begin.elapsed()));
    }

    println!(
        "state {:?}: {} ok, {} not ready, {} errors",
        grabber.state(),
        stats.0,
        stats.1,
        stats.2
    );
    Ok(())
}
