use super::{CountShape, Counts, FetchError, FetchRequest, FetchStrategy};
use crate::config::ScriptStep;
use log::trace;

/// Replays a fixed list of outcomes, one per fetch. The last outcome repeats.
pub struct ScriptedStrategy {
    log_target: String,
    steps: Vec<ScriptStep>,
    position: usize,
}
impl ScriptedStrategy {
    pub fn new(name: &str, steps: Vec<ScriptStep>) -> Self {
        Self {
            log_target: format!("Scripted[{}]", name),
            steps,
            position: 0,
        }
    }
}
impl FetchStrategy for ScriptedStrategy {
    fn shape(&self) -> CountShape {
        if self
            .steps
            .iter()
            .any(|step| matches!(step, ScriptStep::Pair { .. }))
        {
            CountShape::Pair
        } else {
            CountShape::Single
        }
    }

    fn fetch(&mut self, _request: FetchRequest<'_>) -> Result<Counts, FetchError> {
        let step = match self.steps.get(self.position).or_else(|| self.steps.last()) {
            Some(step) => step.clone(),
            None => return Ok(Counts::Single(0)),
        };
        if self.position < self.steps.len() {
            self.position += 1;
        }
        trace!(target: &self.log_target, "Replaying {:?}", step);
        match step {
            ScriptStep::Count { count } => Ok(Counts::Single(count)),
            ScriptStep::Pair { tasks, issues } => Ok(Counts::Pair { tasks, issues }),
            ScriptStep::AuthFailure => Err(FetchError::Authentication("scripted".to_owned())),
            ScriptStep::ConnectionFailure => Err(FetchError::Connectivity("scripted".to_owned())),
            ScriptStep::Rejected { message } => Err(FetchError::Rejected(message)),
            ScriptStep::Fatal { message } => Err(FetchError::Unclassified(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{ConnectionParams, Credentials};

    fn run(strategy: &mut ScriptedStrategy, times: usize) -> Vec<Result<Counts, String>> {
        let connection = ConnectionParams::default();
        let credentials = Credentials::default();
        (0..times)
            .map(|_| {
                strategy
                    .fetch(FetchRequest {
                        connection: &connection,
                        credentials: &credentials,
                    })
                    .map_err(|e| e.to_string())
            })
            .collect()
    }

    #[test]
    fn steps_replay_in_order_and_last_repeats() {
        let mut strategy = ScriptedStrategy::new(
            "test",
            vec![
                ScriptStep::Count { count: 1 },
                ScriptStep::ConnectionFailure,
                ScriptStep::Count { count: 4 },
            ],
        );
        assert_eq!(strategy.shape(), CountShape::Single);
        let results = run(&mut strategy, 5);
        assert_eq!(results[0], Ok(Counts::Single(1)));
        assert!(results[1].is_err());
        assert_eq!(&results[2..], &[Ok(Counts::Single(4)), Ok(Counts::Single(4)), Ok(Counts::Single(4))]);
    }

    #[test]
    fn pair_steps_make_a_pair_shape() {
        let strategy = ScriptedStrategy::new("test", vec![ScriptStep::Pair { tasks: 1, issues: 2 }]);
        assert_eq!(strategy.shape(), CountShape::Pair);
    }

    #[test]
    fn empty_script_reports_nothing_pending() {
        let mut strategy = ScriptedStrategy::new("test", Vec::new());
        assert_eq!(run(&mut strategy, 2), vec![Ok(Counts::Single(0)), Ok(Counts::Single(0))]);
    }
}
