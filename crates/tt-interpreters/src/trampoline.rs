use std::collections::VecDeque;

/// A deferred step: consumes its positional and keyword arguments in
/// queue order and yields one value.
pub type StepFn<'a, V, E> = Box<dyn FnOnce(Vec<V>, Vec<(String, V)>) -> Result<V, E> + 'a>;

struct Scheduled<'a, V, E> {
    step: StepFn<'a, V, E>,
    nargs: usize,
    nkwargs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError<E> {
    /// A step returned an error; pending work was discarded.
    Step(E),
    /// A step declared more arguments than were queued.
    ArgumentUnderflow {
        queue: &'static str,
        needed: usize,
        available: usize,
    },
    /// The work list drained but more than one value remained.
    Residual { args: usize, kwargs: usize },
    /// The work list drained without producing a value.
    Empty,
}

impl<E: std::fmt::Display> std::fmt::Display for DriverError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Step(err) => write!(f, "{err}"),
            Self::ArgumentUnderflow {
                queue,
                needed,
                available,
            } => write!(
                f,
                "step needs {needed} {queue} arguments but only {available} are queued"
            ),
            Self::Residual { args, kwargs } => write!(
                f,
                "work list finished with {args} positional and {kwargs} keyword values left"
            ),
            Self::Empty => write!(f, "work list finished without a result"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for DriverError<E> {}

/// FIFO work list with positional and keyword argument queues.
///
/// `run` pops the oldest step, hands it exactly the number of arguments it
/// declared, and appends its result to the positional queue.
pub struct Trampoline<'a, V, E> {
    steps: VecDeque<Scheduled<'a, V, E>>,
    args: VecDeque<V>,
    kwargs: VecDeque<(String, V)>,
}

impl<V, E> Default for Trampoline<'_, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, V, E> Trampoline<'a, V, E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            args: VecDeque::new(),
            kwargs: VecDeque::new(),
        }
    }

    pub fn schedule(&mut self, step: StepFn<'a, V, E>, nargs: usize, nkwargs: usize) {
        self.steps.push_back(Scheduled {
            step,
            nargs,
            nkwargs,
        });
    }

    pub fn push_arg(&mut self, value: V) {
        self.args.push_back(value);
    }

    pub fn push_kwarg(&mut self, name: impl Into<String>, value: V) {
        self.kwargs.push_back((name.into(), value));
    }

    /// Schedules `step` and enqueues its arguments in one go.
    pub fn call(
        &mut self,
        step: StepFn<'a, V, E>,
        args: impl IntoIterator<Item = V>,
        kwargs: impl IntoIterator<Item = (String, V)>,
    ) {
        let before = (self.args.len(), self.kwargs.len());
        self.args.extend(args);
        self.kwargs.extend(kwargs);
        let nargs = self.args.len() - before.0;
        let nkwargs = self.kwargs.len() - before.1;
        self.schedule(step, nargs, nkwargs);
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.steps.len()
    }

    /// Drains the work list. On failure everything still queued is dropped.
    pub fn run(mut self) -> Result<V, DriverError<E>> {
        let mut executed = 0_usize;
        while let Some(Scheduled {
            step,
            nargs,
            nkwargs,
        }) = self.steps.pop_front()
        {
            if let Err(err) = self.check_available(nargs, nkwargs) {
                self.discard(executed);
                return Err(err);
            }
            let args: Vec<V> = self.args.drain(..nargs).collect();
            let kwargs: Vec<(String, V)> = self.kwargs.drain(..nkwargs).collect();
            match step(args, kwargs) {
                Ok(value) => self.args.push_back(value),
                Err(err) => {
                    self.discard(executed);
                    return Err(DriverError::Step(err));
                }
            }
            executed += 1;
        }

        if self.args.len() != 1 || !self.kwargs.is_empty() {
            let err = if self.args.is_empty() && self.kwargs.is_empty() {
                DriverError::Empty
            } else {
                DriverError::Residual {
                    args: self.args.len(),
                    kwargs: self.kwargs.len(),
                }
            };
            self.discard(executed);
            return Err(err);
        }
        self.args.pop_front().ok_or(DriverError::Empty)
    }

    fn check_available(&self, nargs: usize, nkwargs: usize) -> Result<(), DriverError<E>> {
        if self.args.len() < nargs {
            return Err(DriverError::ArgumentUnderflow {
                queue: "positional",
                needed: nargs,
                available: self.args.len(),
            });
        }
        if self.kwargs.len() < nkwargs {
            return Err(DriverError::ArgumentUnderflow {
                queue: "keyword",
                needed: nkwargs,
                available: self.kwargs.len(),
            });
        }
        Ok(())
    }

    fn discard(&mut self, executed: usize) {
        tracing::warn!(
            executed,
            pending_steps = self.steps.len(),
            pending_args = self.args.len(),
            pending_kwargs = self.kwargs.len(),
            "discarding deferred work"
        );
        self.steps.clear();
        self.args.clear();
        self.kwargs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{DriverError, StepFn, Trampoline};

    fn add_all<'a>() -> StepFn<'a, i64, String> {
        Box::new(|args, kwargs| {
            Ok(args.iter().sum::<i64>() + kwargs.iter().map(|(_, v)| v).sum::<i64>())
        })
    }

    #[test]
    fn steps_consume_arguments_in_queue_order() {
        let mut driver: Trampoline<'_, i64, String> = Trampoline::new();
        driver.call(Box::new(|_, _| Ok(2)), [], []);
        driver.call(Box::new(|_, _| Ok(10)), [], []);
        driver.schedule(
            Box::new(|args, _| Ok(args[0] * 100 + args[1])),
            2,
            0,
        );
        assert_eq!(driver.run().expect("drain"), 210);
    }

    #[test]
    fn keyword_arguments_are_dequeued_separately() {
        let mut driver: Trampoline<'_, i64, String> = Trampoline::new();
        driver.call(add_all(), [1, 2], [("scale".to_owned(), 4)]);
        assert_eq!(driver.pending(), 1);
        assert_eq!(driver.run().expect("drain"), 7);
    }

    #[test]
    fn failing_step_discards_later_work() {
        let ran_after = std::cell::Cell::new(false);
        let mut driver: Trampoline<'_, i64, String> = Trampoline::new();
        driver.call(Box::new(|_, _| Err("boom".to_owned())), [], []);
        driver.call(
            Box::new(|_, _| {
                ran_after.set(true);
                Ok(0)
            }),
            [],
            [],
        );
        assert_eq!(driver.run(), Err(DriverError::Step("boom".to_owned())));
        assert!(!ran_after.get());
    }

    #[test]
    fn leftover_values_are_a_driver_defect() {
        let mut driver: Trampoline<'_, i64, String> = Trampoline::new();
        driver.push_arg(1);
        driver.call(Box::new(|_, _| Ok(2)), [], []);
        assert_eq!(
            driver.run(),
            Err(DriverError::Residual { args: 2, kwargs: 0 })
        );
    }

    #[test]
    fn underflow_and_empty_are_reported() {
        let mut driver: Trampoline<'_, i64, String> = Trampoline::new();
        driver.schedule(add_all(), 3, 0);
        driver.push_arg(1);
        assert!(matches!(
            driver.run(),
            Err(DriverError::ArgumentUnderflow { needed: 3, available: 1, .. })
        ));

        let empty: Trampoline<'_, i64, String> = Trampoline::new();
        assert_eq!(empty.run(), Err(DriverError::Empty));
    }
}
