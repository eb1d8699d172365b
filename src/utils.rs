//! Small numerical helpers shared by the generators and the measures.

/// Slack used when converting durations into a number of time steps, so that e.g. 0.01 / 0.001 gives 10 steps and not 11.
const STEP_TOLERANCE: f64 = 1e-9;

/// Returns the number of time steps needed to cover the given duration, i.e., ceil(duration / dt).
pub fn num_steps(duration: f64, dt: f64) -> usize {
    let steps = (duration / dt - STEP_TOLERANCE).ceil();
    if steps > 0.0 {
        steps as usize
    } else {
        0
    }
}

/// Returns the number of time steps closest to the given duration.
pub fn round_steps(duration: f64, dt: f64) -> usize {
    let steps = (duration / dt).round();
    if steps > 0.0 {
        steps as usize
    } else {
        0
    }
}

/// Repeat the provided values cyclically until the target length is reached.
///
/// # Examples
///
/// ```rust
/// use rusty_patterns::utils::cycle_fill;
///
/// assert_eq!(cycle_fill(&[1, 2, 3], 5), vec![1, 2, 3, 1, 2]);
/// ```
pub fn cycle_fill<T: Clone>(values: &[T], length: usize) -> Vec<T> {
    values.iter().cycle().take(length).cloned().collect()
}

/// Logistic function centered at `offset` with the given `width`.
pub fn sigmoid(value: f64, offset: f64, width: f64) -> f64 {
    1.0 / (1.0 + (-(value - offset) / width).exp())
}

/// Convert spike times in seconds into (rounded) time step indices.
pub fn to_steps(spike_times: &[Vec<f64>], dt: f64) -> Vec<Vec<usize>> {
    spike_times
        .iter()
        .map(|ctimes| ctimes.iter().map(|t| round_steps(*t, dt)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_steps() {
        assert_eq!(num_steps(0.01, 0.001), 10);
        assert_eq!(num_steps(0.0105, 0.001), 11);
        assert_eq!(num_steps(50e-3, 1e-3), 50);
        assert_eq!(num_steps(0.0, 1e-3), 0);
        assert_eq!(num_steps(-1.0, 1e-3), 0);
    }

    #[test]
    fn test_cycle_fill() {
        assert_eq!(cycle_fill(&[1, 2, 3], 5), vec![1, 2, 3, 1, 2]);
        assert_eq!(cycle_fill(&[1, 2, 3], 2), vec![1, 2]);
        assert_eq!(cycle_fill::<i32>(&[], 4), Vec::<i32>::new());
    }

    #[test]
    fn test_sigmoid() {
        assert_eq!(sigmoid(2.0, 2.0, 1.0), 0.5);
        assert!(sigmoid(100.0, 0.0, 1.0) > 0.999);
        assert!(sigmoid(-100.0, 0.0, 1.0) < 0.001);
    }

    #[test]
    fn test_to_steps() {
        let times = vec![vec![0.001, 0.0029999999, 0.120], vec![]];
        assert_eq!(to_steps(&times, 1e-3), vec![vec![1, 3, 120], vec![]]);
    }
}
