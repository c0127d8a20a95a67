use async_trait::async_trait;
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 32;

/// State/event table for one machine domain.
pub trait MachineDefinition: Send + Sync + 'static {
    type State: Clone + Debug + PartialEq + Send + Sync;
    type Event: Clone + Debug + Send + Sync;
    type Effect: Clone + Debug + Send + Sync;

    /// `None` means the event is not valid in `state` and is discarded.
    fn transition(
        state: &Self::State,
        event: &Self::Event,
    ) -> Option<Transition<Self::State, Self::Effect>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S, F> {
    pub next: S,
    pub effects: Vec<F>,
}

impl<S, F> Transition<S, F> {
    pub fn to(next: S) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    pub fn with(next: S, effects: Vec<F>) -> Self {
        Self { next, effects }
    }
}

/// Performs the I/O an effect describes. Runs after the state has moved.
///
/// Handlers may call [`StateMachine::send`] on the machine they serve; while a
/// drain is running that only enqueues.
#[async_trait]
pub trait EffectHandler<D: MachineDefinition>: Send + Sync {
    async fn handle(&self, effect: D::Effect, machine: &StateMachine<D>);
}

struct MachineInner<D: MachineDefinition> {
    state: D::State,
    queue: VecDeque<D::Event>,
    processing: bool,
    processed: u64,
    dropped: u64,
}

pub struct StateMachine<D: MachineDefinition> {
    inner: Mutex<MachineInner<D>>,
    handler: Mutex<Option<Arc<dyn EffectHandler<D>>>>,
    max_queue_depth: usize,
}

impl<D: MachineDefinition> StateMachine<D> {
    pub fn new(initial: D::State) -> Self {
        Self::with_max_queue_depth(initial, DEFAULT_MAX_QUEUE_DEPTH)
    }

    pub fn with_max_queue_depth(initial: D::State, max_queue_depth: usize) -> Self {
        Self {
            inner: Mutex::new(MachineInner {
                state: initial,
                queue: VecDeque::new(),
                processing: false,
                processed: 0,
                dropped: 0,
            }),
            handler: Mutex::new(None),
            max_queue_depth,
        }
    }

    pub fn set_effect_handler(&self, handler: Arc<dyn EffectHandler<D>>) {
        *lock(&self.handler) = Some(handler);
    }

    pub fn clear_effect_handler(&self) {
        *lock(&self.handler) = None;
    }

    pub fn current_state(&self) -> D::State {
        lock(&self.inner).state.clone()
    }

    pub fn force_state(&self, state: D::State) {
        let mut inner = lock(&self.inner);
        debug!("Forcing machine state {:?} -> {state:?}", inner.state);
        inner.state = state;
    }

    pub fn processed_events(&self) -> u64 {
        lock(&self.inner).processed
    }

    pub fn dropped_events(&self) -> u64 {
        lock(&self.inner).dropped
    }

    pub fn max_queue_depth(&self) -> usize {
        self.max_queue_depth
    }

    /// Deliver an event. Always returns `true`: the event is either processed
    /// now or queued behind the drain that is already running.
    pub async fn send(&self, event: D::Event) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.processing {
                if inner.queue.len() >= self.max_queue_depth {
                    inner.dropped += 1;
                    warn!(
                        "State machine queue full ({} events), dropping {event:?}",
                        self.max_queue_depth
                    );
                } else {
                    inner.queue.push_back(event);
                }
                return true;
            }
            inner.processing = true;
            inner.queue.push_back(event);
        }

        self.drain().await;
        true
    }

    async fn drain(&self) {
        // One drain runs at most `max_queue_depth + 1` effects and handles at
        // most that many events.
        let budget = self.max_queue_depth + 1;
        let mut handled = 0usize;
        let mut effects_run = 0usize;

        loop {
            let (event, transition) = {
                let mut inner = lock(&self.inner);
                if handled >= budget {
                    self.halt(&mut inner, handled, 0);
                    return;
                }
                let Some(event) = inner.queue.pop_front() else {
                    inner.processing = false;
                    return;
                };
                handled += 1;

                let transition = D::transition(&inner.state, &event);
                if let Some(transition) = &transition {
                    debug!(
                        "State machine {:?} --{event:?}--> {:?}",
                        inner.state, transition.next
                    );
                    inner.state = transition.next.clone();
                    inner.processed += 1;
                } else {
                    debug!("Ignoring {event:?} in state {:?}", inner.state);
                }
                (event, transition)
            };

            let Some(transition) = transition else {
                continue;
            };
            if transition.effects.is_empty() {
                continue;
            }

            let handler = lock(&self.handler).clone();
            let Some(handler) = handler else {
                debug!(
                    "No effect handler registered; {} effect(s) from {event:?} skipped",
                    transition.effects.len()
                );
                continue;
            };

            let total = transition.effects.len();
            for (index, effect) in transition.effects.into_iter().enumerate() {
                if effects_run >= budget {
                    let mut inner = lock(&self.inner);
                    self.halt(&mut inner, handled, total - index);
                    return;
                }
                effects_run += 1;
                handler.handle(effect, self).await;
            }
        }
    }

    /// Ends a drain whose budget is spent, discarding unrun effects and queued events.
    fn halt(&self, inner: &mut MachineInner<D>, handled: usize, skipped_effects: usize) {
        let discarded = inner.queue.len();
        if discarded > 0 || skipped_effects > 0 {
            warn!(
                "State machine stopped draining after {handled} events; skipping {skipped_effects} effect(s) and {discarded} queued event(s) in state {:?}",
                inner.state
            );
            inner.dropped += discarded as u64;
            inner.queue.clear();
        }
        inner.processing = false;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
