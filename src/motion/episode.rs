use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifecycle notification emitted by a [`MotionEpisode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotionNotification {
    /// First frame with motion after an idle period.
    Started,
    /// Motion is still present `seconds` whole seconds into the episode.
    Sustained { seconds: u64 },
    /// Motion stopped after an episode longer than the minimum reporting duration.
    Ended {
        #[serde(with = "duration_secs")]
        elapsed: Duration,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpisodeState {
    Idle,
    Active,
}

/// Start / sustained / ended state machine for one camera.
///
/// Time is injected, so the machine runs the same against a synthetic clock.
#[derive(Debug)]
pub struct MotionEpisode {
    ended_min_duration: Duration,
    sustained_tolerance: Duration,
    active: Option<ActiveEpisode>,
}

#[derive(Debug)]
struct ActiveEpisode {
    started_at: Instant,
    last_reported_second: u64,
}

impl MotionEpisode {
    pub fn new(ended_min_duration: Duration, sustained_tolerance: Duration) -> Self {
        Self {
            ended_min_duration,
            sustained_tolerance,
            active: None,
        }
    }

    pub fn state(&self) -> EpisodeState {
        if self.active.is_some() {
            EpisodeState::Active
        } else {
            EpisodeState::Idle
        }
    }

    /// Time since the episode started, if one is active.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.active
            .as_ref()
            .map(|a| now.saturating_duration_since(a.started_at))
    }

    /// Feed one frame's region count.
    pub fn observe(&mut self, regions: usize, now: Instant) -> Option<MotionNotification> {
        match (self.active.as_mut(), regions > 0) {
            (None, true) => {
                self.active = Some(ActiveEpisode {
                    started_at: now,
                    last_reported_second: 0,
                });
                Some(MotionNotification::Started)
            }
            (Some(active), true) => {
                let elapsed = now.saturating_duration_since(active.started_at);
                let seconds = elapsed.as_secs();
                let into_second = elapsed - Duration::from_secs(seconds);
                if seconds >= 1
                    && seconds > active.last_reported_second
                    && into_second < self.sustained_tolerance
                {
                    active.last_reported_second = seconds;
                    Some(MotionNotification::Sustained { seconds })
                } else {
                    None
                }
            }
            (Some(_), false) => {
                let elapsed = self.elapsed(now).unwrap_or_default();
                self.active = None;
                (elapsed > self.ended_min_duration).then_some(MotionNotification::Ended { elapsed })
            }
            (None, false) => None,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
