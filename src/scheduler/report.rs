/// What one attempt of a task produced.
#[derive(Debug)]
pub enum Attempt<O, E> {
    /// Task done; `O` is its output.
    Success(O),
    /// Expected end of data. Stops enumeration in probing mode.
    Boundary,
    /// May succeed if attempted again.
    Transient(E),
    /// Will not succeed; abandon without retrying.
    Fatal(E),
}

/// Terminal state of a dispatched task.
#[derive(Debug)]
pub enum TaskState<O, E> {
    Succeeded(O),
    /// Gave up. `exhausted` is true when patience ran out on transient
    /// errors, false for a fatal error.
    Abandoned { cause: E, exhausted: bool },
    /// Hit the end of the data. Not a failure.
    Boundary,
}

impl<O, E> TaskState<O, E> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskState::Succeeded(_))
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, TaskState::Abandoned { .. })
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self, TaskState::Boundary)
    }
}

/// A task that reached a terminal state.
#[derive(Debug)]
pub struct TaskRecord<T, O, E> {
    /// 0-based position in the task sequence
    pub position: usize,
    /// 0-based index of the window the task ran in
    pub window: usize,
    pub task: T,
    pub attempts: u32,
    pub state: TaskState<O, E>,
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub abandoned: usize,
    pub boundary: usize,
    /// Drawn into a window but never attempted (past a stop or after abort)
    pub discarded: usize,
}

impl Tally {
    pub(crate) fn record<O, E>(&mut self, state: &TaskState<O, E>) {
        match state {
            TaskState::Succeeded(_) => self.succeeded += 1,
            TaskState::Abandoned { .. } => self.abandoned += 1,
            TaskState::Boundary => self.boundary += 1,
        }
    }

    /// Tasks that reached a terminal state.
    pub fn resolved(&self) -> usize {
        self.succeeded + self.abandoned + self.boundary
    }

    pub(crate) fn absorb(&mut self, other: &Tally) {
        self.succeeded += other.succeeded;
        self.abandoned += other.abandoned;
        self.boundary += other.boundary;
        self.discarded += other.discarded;
    }
}

/// Everything a scheduler run produced, in task order.
#[derive(Debug)]
pub struct ScheduleReport<T, O, E> {
    /// Terminal records sorted by position. Discarded tasks have none.
    pub records: Vec<TaskRecord<T, O, E>>,
    /// Totals across all windows
    pub tally: Tally,
    /// One tally per dispatched window, in dispatch order
    pub window_tallies: Vec<Tally>,
    /// Probing mode: lowest position whose boundary or abandonment ended
    /// enumeration
    pub stopped_at: Option<usize>,
    /// The abort signal cut the run short
    pub aborted: bool,
}

impl<T, O, E> ScheduleReport<T, O, E> {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
            tally: Tally::default(),
            window_tallies: Vec::new(),
            stopped_at: None,
            aborted: false,
        }
    }

    /// Number of windows dispatched.
    pub fn windows(&self) -> usize {
        self.window_tallies.len()
    }

    /// Record at `position`, if that task was dispatched.
    pub fn record_at(&self, position: usize) -> Option<&TaskRecord<T, O, E>> {
        self.records
            .binary_search_by_key(&position, |r| r.position)
            .ok()
            .map(|idx| &self.records[idx])
    }

    /// The record that stopped enumeration, if any.
    pub fn stop_record(&self) -> Option<&TaskRecord<T, O, E>> {
        self.stopped_at.and_then(|position| self.record_at(position))
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&T, &O)> {
        self.records.iter().filter_map(|r| match &r.state {
            TaskState::Succeeded(output) => Some((&r.task, output)),
            _ => None,
        })
    }

    pub fn abandoned(&self) -> impl Iterator<Item = &TaskRecord<T, O, E>> {
        self.records.iter().filter(|r| r.state.is_abandoned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: usize, state: TaskState<(), &'static str>) -> TaskRecord<u32, (), &'static str> {
        TaskRecord {
            position,
            window: 0,
            task: position as u32 + 1,
            attempts: 1,
            state,
        }
    }

    #[test]
    fn test_tally_counts_terminal_states() {
        let mut tally = Tally::default();
        tally.record(&TaskState::<(), ()>::Succeeded(()));
        tally.record(&TaskState::<(), ()>::Boundary);
        tally.record(&TaskState::<(), ()>::Abandoned {
            cause: (),
            exhausted: true,
        });
        tally.record(&TaskState::<(), ()>::Succeeded(()));
        assert_eq!(tally.succeeded, 2);
        assert_eq!(tally.boundary, 1);
        assert_eq!(tally.abandoned, 1);
        assert_eq!(tally.resolved(), 4);

        let mut total = Tally::default();
        total.absorb(&tally);
        total.absorb(&Tally {
            discarded: 3,
            ..Tally::default()
        });
        assert_eq!(total.succeeded, 2);
        assert_eq!(total.discarded, 3);
    }

    #[test]
    fn test_record_lookup_by_position() {
        let mut report = ScheduleReport::new();
        report.records = vec![
            record(0, TaskState::Succeeded(())),
            record(1, TaskState::Succeeded(())),
            record(4, TaskState::Boundary),
        ];
        report.stopped_at = Some(4);

        assert!(report.record_at(2).is_none());
        assert_eq!(report.record_at(1).map(|r| r.task), Some(2));
        assert!(report.stop_record().is_some_and(|r| r.state.is_boundary()));
        assert_eq!(report.succeeded().count(), 2);
        assert_eq!(report.abandoned().count(), 0);
    }
}
