//! Fault injection for exercising loss recovery.
//!
//! Real networks drop packets, but rarely on demand.  To exercise the
//! retransmission paths without depending on actual network conditions,
//! the connection layer asks a [`FaultInjector`] before every
//! non-handshake send whether the datagram should silently vanish.
//!
//! The injector owns a *budget*: once `max_losses` datagrams have been
//! dropped in the current transfer, every later send goes through.  The
//! drop decision itself is delegated to a [`LossDecider`] so tests can
//! replace true randomness with a seeded RNG or a fixed schedule.
//!
//! | Decider          | Behaviour                                        |
//! |------------------|--------------------------------------------------|
//! | [`NoLoss`]       | Never drops.                                     |
//! | [`RandomLoss`]   | Draws from `[1, round(1/p)]`; a `1` drops.       |
//! | [`ScriptedLoss`] | Drops exactly the listed send indices.           |

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A single drop/keep decision source.
pub trait LossDecider: Send + Sync {
    /// Return `true` to drop the next send.
    fn roll(&mut self) -> bool;
}

/// Never drops anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoss;

impl LossDecider for NoLoss {
    fn roll(&mut self) -> bool {
        false
    }
}

/// Uniform random loss with probability roughly `p`.
///
/// Each roll draws an integer in `[1, round(1/p)]` and drops on `1`.
#[derive(Debug, Clone)]
pub struct RandomLoss {
    rng: StdRng,
    upper: u64,
}

impl RandomLoss {
    /// Random loss seeded from the OS.
    pub fn new(probability: f64) -> Self {
        Self::with_rng(probability, StdRng::from_os_rng())
    }

    /// Reproducible random loss for tests.
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self::with_rng(probability, StdRng::seed_from_u64(seed))
    }

    fn with_rng(probability: f64, rng: StdRng) -> Self {
        Self {
            rng,
            upper: draw_range(probability),
        }
    }
}

impl LossDecider for RandomLoss {
    fn roll(&mut self) -> bool {
        self.upper != 0 && self.rng.random_range(1..=self.upper) == 1
    }
}

/// Upper bound of the draw for probability `p`; `0` means "never drop".
fn draw_range(probability: f64) -> u64 {
    if probability.is_nan() || probability <= 0.0 {
        return 0;
    }
    ((1.0 / probability).round() as u64).max(1)
}

/// Drops the sends whose zero-based index appears in the schedule.
///
/// Indices count every roll, i.e. every non-handshake send attempted while
/// the injector budget was still open.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLoss {
    drops: BTreeSet<u64>,
    next: u64,
}

impl ScriptedLoss {
    pub fn new(drops: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drops: drops.into_iter().collect(),
            next: 0,
        }
    }
}

impl LossDecider for ScriptedLoss {
    fn roll(&mut self) -> bool {
        let index = self.next;
        self.next += 1;
        self.drops.contains(&index)
    }
}

/// Budgeted loss simulation for one endpoint.
pub struct FaultInjector {
    decider: Box<dyn LossDecider>,
    max_losses: u32,
    losses: u32,
}

impl FaultInjector {
    /// Wrap `decider` with a budget of `max_losses` drops per transfer.
    pub fn new(decider: impl LossDecider + 'static, max_losses: u32) -> Self {
        Self {
            decider: Box::new(decider),
            max_losses,
            losses: 0,
        }
    }

    /// An injector that never drops.
    pub fn disabled() -> Self {
        Self::new(NoLoss, 0)
    }

    /// OS-seeded random loss at `probability`, or disabled when either the
    /// probability or the budget is zero.
    pub fn random(probability: f64, max_losses: u32) -> Self {
        if max_losses == 0 || draw_range(probability) == 0 {
            return Self::disabled();
        }
        Self::new(RandomLoss::new(probability), max_losses)
    }

    /// Decide whether the next send is dropped.
    ///
    /// The decider is only consulted while budget remains.
    pub fn should_drop(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        if self.decider.roll() {
            self.losses += 1;
            true
        } else {
            false
        }
    }

    /// `true` once no further drops are allowed.
    pub fn exhausted(&self) -> bool {
        self.losses >= self.max_losses
    }

    /// Drops allowed per transfer.
    pub fn max_losses(&self) -> u32 {
        self.max_losses
    }

    /// Drops performed since the last [`reset`](Self::reset).
    pub fn losses(&self) -> u32 {
        self.losses
    }

    /// Re-open the budget for the next transfer.
    pub fn reset(&mut self) {
        self.losses = 0;
    }
}

impl std::fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjector")
            .field("max_losses", &self.max_losses)
            .field("losses", &self.losses)
            .finish_non_exhaustive()
    }
}
