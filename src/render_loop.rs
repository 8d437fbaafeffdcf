use std::time::Duration;

use log::debug;

/// What a frame callback should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Render,
    /// Too early; ask for another frame without drawing.
    Skip,
    /// The surface is gone. No further frames should be requested.
    Stop,
}

/// Frame-rate throttle driven by the platform's per-frame callback. Every
/// callback re-checks elapsed time instead of relying on timers.
#[derive(Debug, Clone)]
pub struct RenderLoop {
    interval: Duration,
    last_render: Option<Duration>,
    stopped: bool,
}

impl RenderLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_render: None,
            stopped: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Called once per frame callback. `alive` reports whether the surface is
    /// still attached; once it is not, the loop stops for good.
    pub fn on_frame(&mut self, now: Duration, alive: bool) -> FrameAction {
        if self.stopped {
            return FrameAction::Stop;
        }
        if !alive {
            debug!("render surface detached, stopping render loop");
            self.stopped = true;
            return FrameAction::Stop;
        }
        let due = self
            .last_render
            .is_none_or(|last| now.saturating_sub(last) >= self.interval);
        if due {
            self.last_render = Some(now);
            FrameAction::Render
        } else {
            FrameAction::Skip
        }
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_throttled_to_interval() {
        let mut render_loop = RenderLoop::new(Duration::from_millis(33));
        let ms = Duration::from_millis;
        assert_eq!(render_loop.on_frame(ms(0), true), FrameAction::Render);
        assert_eq!(render_loop.on_frame(ms(16), true), FrameAction::Skip);
        assert_eq!(render_loop.on_frame(ms(33), true), FrameAction::Render);
        assert_eq!(render_loop.on_frame(ms(50), true), FrameAction::Skip);
    }

    #[test]
    fn test_detached_surface_stops_forever() {
        let mut render_loop = RenderLoop::new(Duration::from_millis(10));
        assert_eq!(render_loop.on_frame(Duration::ZERO, false), FrameAction::Stop);
        assert!(render_loop.is_stopped());
        assert_eq!(
            render_loop.on_frame(Duration::from_secs(1), true),
            FrameAction::Stop
        );
    }
}
