//! Generic polling helpers for set-and-wait measurements.
//!
//! Device set-points (bias voltage, temperature, offsets) take time to take
//! effect; these helpers issue the set once and poll the matching getter
//! until it settles. Hitting the timeout is not an error here: the last
//! observed value is returned and the caller decides whether it is usable.

use std::time::{Duration, Instant};

use log::debug;

use crate::error::Result;

/// Polling parameters for [`await_set_stabilized`].
#[derive(Debug, Clone, Copy)]
pub struct StabilizeParams {
    /// Acceptable absolute deviation from the target.
    pub tolerance: f64,
    /// Consecutive in-tolerance readings required.
    pub repeats: u32,
    /// Delay between readings.
    pub interval: Duration,
    /// Overall deadline.
    pub timeout: Duration,
}

impl Default for StabilizeParams {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            repeats: 1,
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(120),
        }
    }
}

impl StabilizeParams {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }
}

/// Set `target` once, then poll `get` until `repeats` consecutive readings
/// land within `tolerance`, or the timeout elapses.
///
/// Returns the last observed value in both cases.
pub fn await_set_stabilized<S, G>(
    mut set: S,
    mut get: G,
    target: f64,
    params: &StabilizeParams,
) -> Result<f64>
where
    S: FnMut(f64) -> Result<()>,
    G: FnMut() -> Result<f64>,
{
    set(target)?;
    let start = Instant::now();
    let mut stable = 0u32;
    loop {
        let current = get()?;
        debug!("waiting for {target:.3}, currently {current:.3}");
        if (current - target).abs() < params.tolerance {
            stable += 1;
            if stable >= params.repeats {
                return Ok(current);
            }
        } else {
            stable = 0;
        }
        if start.elapsed() >= params.timeout {
            debug!("timed out waiting for {target:.3}, currently {current:.3}");
            return Ok(current);
        }
        std::thread::sleep(params.interval);
    }
}

/// Set `target` once, then poll `get` until it compares equal, or the
/// timeout elapses. For discrete values (channels, integer codes).
pub fn await_set<T, S, G>(
    mut set: S,
    mut get: G,
    target: T,
    interval: Duration,
    timeout: Duration,
) -> Result<T>
where
    T: PartialEq + Copy,
    S: FnMut(T) -> Result<()>,
    G: FnMut() -> Result<T>,
{
    set(target)?;
    let start = Instant::now();
    loop {
        let current = get()?;
        if current == target || start.elapsed() >= timeout {
            return Ok(current);
        }
        std::thread::sleep(interval);
    }
}

/// Call `get` `repeats` times, `interval` apart.
pub fn repeated_get<G>(mut get: G, repeats: usize, interval: Duration) -> Result<Vec<f64>>
where
    G: FnMut() -> Result<f64>,
{
    let mut results = Vec::with_capacity(repeats);
    for i in 0..repeats {
        results.push(get()?);
        if i + 1 < repeats {
            std::thread::sleep(interval);
        }
    }
    Ok(results)
}

/// Median of a sample set.
pub fn median(values: &[f64]) -> f64 {
    assert!(!values.is_empty(), "median of empty sample set");
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("NaN in sample set"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_stabilizes_after_ramp() {
        // Getter approaches the target by half the distance per read.
        let current = Cell::new(0.0f64);
        let target_cell = Cell::new(0.0f64);
        let value = await_set_stabilized(
            |t| {
                target_cell.set(t);
                Ok(())
            },
            || {
                let next = current.get() + (target_cell.get() - current.get()) / 2.0;
                current.set(next);
                Ok(next)
            },
            10.0,
            &StabilizeParams {
                tolerance: 0.1,
                repeats: 2,
                interval: Duration::from_millis(1),
                timeout: Duration::from_secs(1),
            },
        )
        .unwrap();
        assert!((value - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_timeout_returns_last_value() {
        let value = await_set_stabilized(
            |_| Ok(()),
            || Ok(3.0),
            10.0,
            &StabilizeParams {
                tolerance: 0.1,
                repeats: 1,
                interval: Duration::from_millis(1),
                timeout: Duration::from_millis(5),
            },
        )
        .unwrap();
        assert_eq!(value, 3.0);
    }

    #[test]
    fn test_await_set_exact() {
        let state = Cell::new(0u8);
        let value = await_set(
            |v| {
                state.set(v);
                Ok(())
            },
            || Ok(state.get()),
            7u8,
            Duration::from_millis(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_repeated_get_counts() {
        let n = Cell::new(0.0f64);
        let samples = repeated_get(
            || {
                n.set(n.get() + 1.0);
                Ok(n.get())
            },
            5,
            Duration::from_millis(1),
        )
        .unwrap();
        assert_eq!(samples, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[5.0]), 5.0);
    }
}
