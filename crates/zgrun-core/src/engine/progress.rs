/// Events emitted by long-running workflows so a front end can render progress.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    /// A batch of `total_steps` tasks has been dispatched.
    TaskStart { total_steps: u64 },
    /// One task finished, carrying this many particles through.
    TaskIncrement { particles: u64 },
    TaskFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Forwards [`Progress`] events to an optional callback.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    /// A reporter that discards every event.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn events_reach_the_callback_in_order() {
        let seen = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            seen.lock().unwrap().push(event);
        }));
        reporter.report(Progress::TaskStart { total_steps: 2 });
        reporter.report(Progress::TaskIncrement { particles: 10 });
        reporter.report(Progress::TaskFinish);
        drop(reporter);

        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                Progress::TaskStart { total_steps: 2 },
                Progress::TaskIncrement { particles: 10 },
                Progress::TaskFinish,
            ]
        );
    }

    #[test]
    fn reporter_without_callback_ignores_events() {
        ProgressReporter::new().report(Progress::Message("ignored".to_string()));
    }
}
