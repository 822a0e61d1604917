//! Notification indicator driven by the network join state
//!
//! While the network is being joined the indicator blinks (500 ms on, 500 ms
//! off). On the tick the network is seen joined it lights once for 3 s and then
//! goes dark for good. Loss of the network restarts the process, so there is no
//! way back to blinking.

use crate::config::IndicatorConfig;
use crate::state::LinkStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

pub const SEARCHING_PERIOD: Duration = Duration::from_millis(500);
pub const CONFIRMING_PULSE: Duration = Duration::from_millis(3000);

/// Output pin behind the indicator
pub trait IndicatorPin: Send {
    /// Drive the pin to the given electrical level
    fn set_level(&mut self, high: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    /// Network not joined yet: blink indefinitely
    Searching,
    /// Network just joined: one long pulse
    Confirming,
    /// Terminal
    Off,
}

/// One output phase: lit or dark for `hold`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub lit: bool,
    pub hold: Duration,
}

impl IndicatorState {
    /// State to enter at the start of a tick
    pub fn on_tick(self, network_joined: bool) -> Self {
        match self {
            IndicatorState::Searching if network_joined => IndicatorState::Confirming,
            other => other,
        }
    }

    /// Output phases played while in this state
    pub fn phases(self) -> &'static [Phase] {
        const SEARCHING: [Phase; 2] = [
            Phase {
                lit: true,
                hold: SEARCHING_PERIOD,
            },
            Phase {
                lit: false,
                hold: SEARCHING_PERIOD,
            },
        ];
        const CONFIRMING: [Phase; 2] = [
            Phase {
                lit: true,
                hold: CONFIRMING_PULSE,
            },
            Phase {
                lit: false,
                hold: Duration::ZERO,
            },
        ];

        match self {
            IndicatorState::Searching => &SEARCHING,
            IndicatorState::Confirming => &CONFIRMING,
            IndicatorState::Off => &[],
        }
    }

    /// State after the phases of this state have been played
    pub fn after_phases(self) -> Self {
        match self {
            IndicatorState::Searching => IndicatorState::Searching,
            IndicatorState::Confirming | IndicatorState::Off => IndicatorState::Off,
        }
    }
}

/// Indicator output with polarity applied
pub struct Indicator {
    pin: Box<dyn IndicatorPin>,
    active_low: bool,
}

impl Indicator {
    pub fn new(pin: Box<dyn IndicatorPin>, config: IndicatorConfig) -> Self {
        Self {
            pin,
            active_low: config.active_low,
        }
    }

    pub fn set_lit(&mut self, lit: bool) {
        self.pin.set_level(lit != self.active_low);
    }

    /// Run the state machine until it reaches `Off` or `force_off` fires
    ///
    /// `force_off` drives the output dark and ends the task immediately; the
    /// supervisor uses it before performing a terminal action.
    pub fn spawn(
        mut self,
        network: Arc<LinkStatus>,
        mut force_off: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut state = IndicatorState::Searching;

            'ticks: while state != IndicatorState::Off {
                state = state.on_tick(network.is_connected());

                for phase in state.phases() {
                    self.set_lit(phase.lit);
                    if phase.hold.is_zero() {
                        continue;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(phase.hold) => {}
                        Ok(_) = force_off.wait_for(|off| *off) => break 'ticks,
                    }
                }

                state = state.after_phases();
            }

            self.set_lit(false);
            debug!("Notification indicator off");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LinkState;
    use crate::testing::MockIndicator;

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            IndicatorState::Searching.on_tick(false),
            IndicatorState::Searching
        );
        assert_eq!(
            IndicatorState::Searching.on_tick(true),
            IndicatorState::Confirming
        );
        assert_eq!(IndicatorState::Confirming.after_phases(), IndicatorState::Off);
        assert_eq!(IndicatorState::Searching.after_phases(), IndicatorState::Searching);
        // Never back to searching
        assert_eq!(IndicatorState::Off.on_tick(false), IndicatorState::Off);
        assert!(IndicatorState::Off.phases().is_empty());
    }

    #[test]
    fn test_polarity() {
        let pin = MockIndicator::new();
        let mut indicator = Indicator::new(
            Box::new(pin.clone()),
            IndicatorConfig {
                pin: 2,
                active_low: true,
            },
        );
        indicator.set_lit(true);
        indicator.set_lit(false);
        assert_eq!(pin.levels(), vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blinks_then_confirms_then_off() {
        let pin = MockIndicator::new();
        let network = Arc::new(LinkStatus::new());
        let (_off_tx, off_rx) = watch::channel(false);
        let indicator = Indicator::new(
            Box::new(pin.clone()),
            IndicatorConfig {
                pin: 2,
                active_low: false,
            },
        );

        let handle = indicator.spawn(network.clone(), off_rx);

        // Two full blink cycles while searching
        tokio::time::sleep(Duration::from_millis(1900)).await;
        network.advance(LinkState::Connected);

        handle.await.unwrap();
        assert_eq!(
            pin.levels(),
            vec![true, false, true, false, true, false, false]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_off_ends_blinking() {
        let pin = MockIndicator::new();
        let (off_tx, off_rx) = watch::channel(false);
        let indicator = Indicator::new(
            Box::new(pin.clone()),
            IndicatorConfig {
                pin: 2,
                active_low: false,
            },
        );

        let handle = indicator.spawn(Arc::new(LinkStatus::new()), off_rx);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        off_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(pin.levels().last(), Some(&false));
    }
}
