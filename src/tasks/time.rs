use crate::devices::TimeSource;
use crate::mission::{MissionError, NotifyTimeChanged, Shared, Update, UpdateResult};
use crate::state::{SystemState, TimeCorrectionConfig};
use core::time::Duration;
use heapless::Vec;
use tracing::{error, info, warn};

pub const MAX_TIME_OBSERVERS: usize = 8;

/// Keeps `SystemState::time` in step with the mission clock.
///
/// Time only ever moves forward on its own. Jumps in either direction happen
/// through [`TimeTask::set_time`], and every registered observer is told
/// about them before any action sees the new time.
///
/// With an external RTC attached, each update blends the time elapsed on
/// both clocks using the persisted [`TimeCorrectionConfig`] weights and
/// writes the result back to the mission clock.
pub struct TimeTask {
    source: Box<dyn TimeSource>,
    rtc: Option<Box<dyn TimeSource>>,
    /// Mission time and RTC reading at the last correction.
    reference: Option<(Duration, Duration)>,
    observers: Vec<Shared<dyn NotifyTimeChanged>, MAX_TIME_OBSERVERS>,
    pending_correction: Option<Duration>,
}

impl TimeTask {
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            rtc: None,
            reference: None,
            observers: Vec::new(),
            pending_correction: None,
        }
    }

    pub fn with_rtc(mut self, rtc: Box<dyn TimeSource>) -> Self {
        self.rtc = Some(rtc);
        self
    }

    pub fn add_observer(&mut self, observer: Shared<dyn NotifyTimeChanged>) -> Result<(), MissionError> {
        self.observers
            .push(observer)
            .map_err(|_| MissionError::TooManyTimeObservers)
    }

    /// Schedules an explicit time change, applied by the next update.
    pub fn set_time(&mut self, time: Duration) -> bool {
        if let Err(err) = self.source.set_time(time) {
            error!("unable to set mission clock: {}", err);
            return false;
        }

        if let Some(rtc) = self.rtc.as_mut() {
            if let Err(err) = rtc.set_time(time) {
                warn!("unable to set external clock: {}", err);
            }
        }

        self.reference = None;
        self.pending_correction = Some(time);
        true
    }

    fn correct(&mut self, mcu: Duration, weights: TimeCorrectionConfig) -> Duration {
        let Some(rtc) = self.rtc.as_mut() else {
            return mcu;
        };

        let rtc_now = match rtc.current_time() {
            Ok(now) => now,
            Err(err) => {
                warn!("unable to read external clock: {}", err);
                return mcu;
            }
        };

        let corrected = match self.reference {
            Some((mission_ref, rtc_ref)) => blend(
                mission_ref,
                mcu.saturating_sub(mission_ref),
                rtc_now.saturating_sub(rtc_ref),
                weights,
            ),
            None => mcu,
        };
        self.reference = Some((corrected, rtc_now));

        if corrected != mcu {
            if let Err(err) = self.source.set_time(corrected) {
                warn!("unable to write corrected mission clock: {}", err);
            }
        }

        corrected
    }

    fn notify(&self, previous: Duration, current: Duration) {
        for observer in &self.observers {
            observer.borrow_mut().on_time_changed(previous, current);
        }
    }
}

impl Update<SystemState> for TimeTask {
    fn update(&mut self, state: &mut SystemState) -> UpdateResult {
        if let Some(corrected) = self.pending_correction.take() {
            let previous = state.time;
            state.time = corrected;
            info!(previous_ms = previous.as_millis() as u64, current_ms = corrected.as_millis() as u64, "mission time changed");
            self.notify(previous, corrected);
            return UpdateResult::Ok;
        }

        let now = match self.source.current_time() {
            Ok(now) => now,
            Err(err) => {
                error!("unable to read mission clock: {}", err);
                return UpdateResult::Failure;
            }
        };

        if now < state.time {
            warn!(
                clock_ms = now.as_millis() as u64,
                state_ms = state.time.as_millis() as u64,
                "mission clock went backwards, keeping previous time"
            );
            return UpdateResult::Warning;
        }

        state.time = self.correct(now, *state.persistent.get::<TimeCorrectionConfig>());
        UpdateResult::Ok
    }
}

/// Weighted mean of the two elapsed times on top of `base`.
///
/// Negative weights count as zero; with no usable weight the MCU timer wins.
fn blend(base: Duration, mcu_elapsed: Duration, rtc_elapsed: Duration, weights: TimeCorrectionConfig) -> Duration {
    let mcu_weight = u128::try_from(weights.mcu_timer_weight).unwrap_or(0);
    let rtc_weight = u128::try_from(weights.external_timer_weight).unwrap_or(0);
    let total = mcu_weight + rtc_weight;
    if total == 0 {
        return base.saturating_add(mcu_elapsed);
    }

    let nanos = (mcu_elapsed.as_nanos() * mcu_weight + rtc_elapsed.as_nanos() * rtc_weight) / total;
    base.saturating_add(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

impl core::fmt::Debug for TimeTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimeTask")
            .field("has_rtc", &self.rtc.is_some())
            .field("reference", &self.reference)
            .field("observers", &self.observers.len())
            .field("pending_correction", &self.pending_correction)
            .finish_non_exhaustive()
    }
}
