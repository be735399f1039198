use crate::dispatcher::QueryOutcome;

/// Maximum des pourcentages rapportés ; une absence compte pour 0, aucun outcome donne 0
pub fn aggregate<'a, I>(outcomes: I) -> i64
where
    I: IntoIterator<Item = &'a QueryOutcome>,
{
    outcomes
        .into_iter()
        .map(|outcome| outcome.value().unwrap_or(0))
        .fold(0, i64::max)
}
