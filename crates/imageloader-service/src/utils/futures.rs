use std::time::Instant;

/// Timing of a load that first waits for admission and then runs.
///
/// Reports two metrics, both tagged with `task_name`:
///
///  - `futures.wait_time`: Time between creation and [`start`](Self::start).
///  - `futures.done`: Time between creation and the end of the guard, tagged with the status
///    passed to [`done`](Self::done), `"canceled"` if dropped while running, or `"abandoned"`
///    if dropped while still waiting.
pub struct MeasureGuard {
    task_name: &'static str,
    created: Instant,
    started: bool,
    status: Option<&'static str>,
}

impl MeasureGuard {
    pub fn new(task_name: &'static str) -> Self {
        Self {
            task_name,
            created: Instant::now(),
            started: false,
            status: None,
        }
    }

    /// Marks the end of the wait.
    pub fn start(&mut self) {
        self.started = true;
        metric!(
            timer("futures.wait_time") = self.created.elapsed(),
            "task_name" => self.task_name,
        );
    }

    /// Marks the task as finished with `status`.
    pub fn done(mut self, status: &'static str) {
        self.status = Some(status);
    }
}

impl Drop for MeasureGuard {
    fn drop(&mut self) {
        let status = match (self.status, self.started) {
            (Some(status), _) => status,
            (None, true) => "canceled",
            (None, false) => "abandoned",
        };

        metric!(
            timer("futures.done") = self.created.elapsed(),
            "task_name" => self.task_name,
            "status" => status,
        );
    }
}
