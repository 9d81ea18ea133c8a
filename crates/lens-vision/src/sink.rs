use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use image::RgbImage;
use lens_proto::events::OverlayEvent;

/// Where the loop reports what happened each frame.
pub trait EventSink {
    fn emit(&mut self, event: OverlayEvent) -> Result<()>;

    /// Rendered canvas for frames selected by the snapshot cadence.
    fn snapshot(&mut self, _frame: u64, _canvas: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// One JSON record per line, plus optional PNG snapshots in a directory.
pub struct JsonLinesSink<W: Write> {
    out: W,
    snapshot_dir: Option<PathBuf>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, snapshot_dir: None }
    }

    pub fn with_snapshots(mut self, dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        self.snapshot_dir = Some(dir);
        Ok(self)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: OverlayEvent) -> Result<()> {
        serde_json::to_writer(&mut self.out, &event).context("encode event")?;
        self.out.write_all(b"\n").context("write event")?;
        self.out.flush().context("flush events")?;
        Ok(())
    }

    fn snapshot(&mut self, frame: u64, canvas: &RgbImage) -> Result<()> {
        let Some(dir) = &self.snapshot_dir else {
            return Ok(());
        };
        let path = dir.join(format!("frame_{frame:06}.png"));
        canvas
            .save(&path)
            .with_context(|| format!("save snapshot {}", path.display()))
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<OverlayEvent>,
    pub snapshots: Vec<u64>,
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: OverlayEvent) -> Result<()> {
        self.events.push(event);
        Ok(())
    }

    fn snapshot(&mut self, frame: u64, _canvas: &RgbImage) -> Result<()> {
        self.snapshots.push(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_proto::events::EventKind;

    #[test]
    fn writes_one_line_per_event_and_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(Vec::new())
            .with_snapshots(dir.path().join("snaps"))
            .unwrap();
        for frame in 0..2 {
            sink.emit(OverlayEvent::now(frame, EventKind::Idle { reason: "warming up".into() }))
                .unwrap();
        }
        sink.snapshot(7, &RgbImage::new(2, 2)).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let ev: OverlayEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(ev.frame, 1);
        assert!(dir.path().join("snaps/frame_000007.png").is_file());
    }
}
