//! Step verifier for asynchronous sequences.
//!
//! A script of expectations is declared up front; the terminal call
//! subscribes exactly once, blocks the calling thread until the sequence
//! terminates or the window elapses, and compares observed signals against
//! the script strictly in order.
//!
//! ```ignore
//! StepVerifier::create(service.find_all())
//!     .expect_subscription()
//!     .expect_next_count(2)
//!     .verify_complete()?;
//! ```

use std::fmt::{self, Debug, Write as _};
use std::time::{Duration, Instant};

use crate::config::VerifierConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::guard;
use crate::reactive::{Flux, Signal, Subscription};

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send>;

enum Step<T> {
    Subscription,
    Next {
        description: String,
        predicate: Predicate<T>,
    },
    NextCount(usize),
    ConsumeWhile {
        description: String,
        predicate: Predicate<T>,
    },
    Complete,
    ErrorOfKind(ErrorKind),
}

impl<T> Step<T> {
    fn describe(&self) -> String {
        match self {
            Step::Subscription => "expect_subscription()".to_string(),
            Step::Next { description, .. } => description.clone(),
            Step::NextCount(n) => format!("expect_next_count({})", n),
            Step::ConsumeWhile { description, .. } => {
                format!("then_consume_while({})", description)
            }
            Step::Complete => "expect_complete()".to_string(),
            Step::ErrorOfKind(kind) => format!("expect_error_of_kind({:?})", kind),
        }
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub elapsed: Duration,
    /// Values received before the script ended
    pub items: usize,
}

/// Declarative checker for one subscription of a sequence.
#[must_use = "a step verifier does nothing until verify() is called"]
pub struct StepVerifier<T> {
    source: Flux<T>,
    steps: Vec<Step<T>>,
    timeout: Duration,
}

impl<T: Debug + Send + 'static> StepVerifier<T> {
    pub fn create(source: impl Into<Flux<T>>) -> Self {
        Self {
            source: source.into(),
            steps: Vec::new(),
            timeout: VerifierConfig::from_env().timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn expect_subscription(mut self) -> Self {
        self.steps.push(Step::Subscription);
        self
    }

    pub fn expect_next(mut self, expected: T) -> Self
    where
        T: PartialEq,
    {
        let description = format!("expect_next({:?})", expected);
        self.steps.push(Step::Next {
            description,
            predicate: Box::new(move |value| *value == expected),
        });
        self
    }

    /// Next value must satisfy `predicate`; `description` names it in reports.
    pub fn expect_next_matches(
        mut self,
        description: &str,
        predicate: impl Fn(&T) -> bool + Send + 'static,
    ) -> Self {
        self.steps.push(Step::Next {
            description: format!("expect_next_matches({})", description),
            predicate: Box::new(predicate),
        });
        self
    }

    pub fn expect_next_count(mut self, count: usize) -> Self {
        self.steps.push(Step::NextCount(count));
        self
    }

    /// Consumes values while they satisfy `predicate`.
    pub fn then_consume_while(
        mut self,
        description: &str,
        predicate: impl Fn(&T) -> bool + Send + 'static,
    ) -> Self {
        self.steps.push(Step::ConsumeWhile {
            description: description.to_string(),
            predicate: Box::new(predicate),
        });
        self
    }

    pub fn expect_complete(mut self) -> Self {
        self.steps.push(Step::Complete);
        self
    }

    pub fn expect_error_of_kind(mut self, kind: ErrorKind) -> Self {
        self.steps.push(Step::ErrorOfKind(kind));
        self
    }

    pub fn verify_complete(self) -> Result<VerificationReport> {
        self.expect_complete().verify()
    }

    pub fn verify_error_of_kind(self, kind: ErrorKind) -> Result<VerificationReport> {
        self.expect_error_of_kind(kind).verify()
    }

    /// Subscribes once and runs the script, blocking the calling thread.
    ///
    /// A script without a terminal expectation cancels the subscription
    /// once its last step is satisfied.
    pub fn verify(self) -> Result<VerificationReport> {
        guard::enforce("StepVerifier::verify");
        let StepVerifier {
            source,
            steps,
            timeout,
        } = self;
        let started = Instant::now();
        let mut progress = Progress::new();

        let outcome = source.scheduler().runtime().block_on(async {
            tokio::time::timeout(timeout, progress.run(&steps, &source)).await
        });

        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(
                    steps = steps.len(),
                    items = progress.items,
                    "Sequence verified"
                );
                Ok(VerificationReport {
                    elapsed: started.elapsed(),
                    items: progress.items,
                })
            }
            Ok(Err(mismatch)) => Err(Error::AssertionMismatch {
                index: mismatch.index,
                expected: steps[mismatch.index].describe(),
                observed: mismatch.observed,
                transcript: progress.transcript(&steps, Some(mismatch.index)),
            }),
            Err(_) => {
                let index = progress.cursor;
                Err(Error::VerificationTimeout {
                    index,
                    expectation: steps.get(index).map(Step::describe).unwrap_or_default(),
                    timeout,
                    transcript: progress.transcript(&steps, Some(index)),
                })
            }
        }
    }
}

struct Mismatch {
    index: usize,
    observed: String,
}

enum Observed {
    Subscribed,
    Next(String),
    Complete,
    Error(ErrorKind, String),
}

impl fmt::Display for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observed::Subscribed => write!(f, "subscribed"),
            Observed::Next(value) => write!(f, "next({})", value),
            Observed::Complete => write!(f, "complete"),
            Observed::Error(kind, message) => write!(f, "error({:?}: {})", kind, message),
        }
    }
}

struct Progress<T> {
    cursor: usize,
    items: usize,
    observed: Vec<Observed>,
    pending: Option<Signal<T>>,
}

impl<T: Debug + Send + 'static> Progress<T> {
    fn new() -> Self {
        Self {
            cursor: 0,
            items: 0,
            observed: Vec::new(),
            pending: None,
        }
    }

    async fn run(&mut self, steps: &[Step<T>], source: &Flux<T>) -> std::result::Result<(), Mismatch> {
        let mut subscription = source.subscribe();
        self.observed.push(Observed::Subscribed);

        for (index, step) in steps.iter().enumerate() {
            self.cursor = index;
            match step {
                Step::Subscription => {}
                Step::Next { predicate, .. } => match self.pull(&mut subscription).await {
                    Signal::Next(value) if predicate(&value) => {}
                    other => return Err(self.mismatch(index, &other)),
                },
                Step::NextCount(count) => {
                    for seen in 0..*count {
                        match self.pull(&mut subscription).await {
                            Signal::Next(_) => {}
                            other => {
                                let observed = format!(
                                    "{} after {} of {} values",
                                    Self::label(&other),
                                    seen,
                                    count
                                );
                                return Err(Mismatch { index, observed });
                            }
                        }
                    }
                }
                Step::ConsumeWhile { predicate, .. } => loop {
                    match self.pull(&mut subscription).await {
                        Signal::Next(value) if predicate(&value) => {}
                        other => {
                            self.pending = Some(other);
                            break;
                        }
                    }
                },
                Step::Complete => match self.pull(&mut subscription).await {
                    Signal::Complete => {}
                    other => return Err(self.mismatch(index, &other)),
                },
                Step::ErrorOfKind(kind) => match self.pull(&mut subscription).await {
                    Signal::Error(err) if err.kind() == *kind => {}
                    other => return Err(self.mismatch(index, &other)),
                },
            }
        }
        self.cursor = steps.len();
        Ok(())
    }

    async fn pull(&mut self, subscription: &mut Subscription<T>) -> Signal<T> {
        if let Some(signal) = self.pending.take() {
            return signal;
        }
        let signal = subscription.next_signal().await;
        self.observed.push(match &signal {
            Signal::Next(value) => {
                self.items += 1;
                Observed::Next(format!("{:?}", value))
            }
            Signal::Complete => Observed::Complete,
            Signal::Error(err) => Observed::Error(err.kind(), err.to_string()),
        });
        signal
    }

    fn mismatch(&self, index: usize, signal: &Signal<T>) -> Mismatch {
        Mismatch {
            index,
            observed: Self::label(signal),
        }
    }

    fn label(signal: &Signal<T>) -> String {
        match signal {
            Signal::Next(value) => format!("next({:?})", value),
            Signal::Complete => "completion".to_string(),
            Signal::Error(err) => format!("error({:?}: {})", err.kind(), err),
        }
    }

    /// Full expected-vs-observed script.
    fn transcript(&self, steps: &[Step<T>], failed: Option<usize>) -> String {
        let mut out = String::from("expected:\n");
        for (index, step) in steps.iter().enumerate() {
            let status = match failed {
                Some(f) if index == f => "FAIL",
                Some(f) if index > f => "  --",
                _ => "  ok",
            };
            let _ = writeln!(out, "  {} #{} {}", status, index, step.describe());
        }
        out.push_str("observed:\n");
        for event in &self.observed {
            let _ = writeln!(out, "  {}", event);
        }
        out
    }
}
