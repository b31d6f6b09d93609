//! Independent model runs on the rayon pool, and plurality voting over their predictions.
//!
//! Matrices and layers are single-threaded (`Rc` inside), so nothing from the core crosses a
//! thread boundary. Each job builds, trains and evaluates its own model from scratch and hands
//! back plain data, usually a [`ballot`] of predicted classes. Joining the pool is the only
//! synchronization point.
//!
//! # Example
//!
//! ```rust
//! use ant_nn::ensemble::{plurality_vote, run_independent};
//!
//! fn main() -> ant_nn::Result<()> {
//!     // three "models" that each predict two samples
//!     let ballots = run_independent(3, |job| Ok(vec![job % 2, 1]))?;
//!     let elected = plurality_vote(&ballots, 2)?;
//!     assert_eq!(elected[0].winner, 0);
//!     assert_eq!(elected[1].support, 3);
//!     Ok(())
//! }
//! ```

use log::info;
use rayon::prelude::*;

use crate::error::{AntError, Result};
use crate::matrix::Matrix;

/// Runs `job(0..jobs)` in parallel and returns the results in job order.
///
/// The first failing job's error is returned; the remaining jobs still run to completion.
pub fn run_independent<T, F>(jobs: usize, job: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync + Send,
{
    info!("ensemble: starting {jobs} independent jobs");
    let results: Vec<Result<T>> = (0..jobs)
        .into_par_iter()
        .map(|i| {
            let r = job(i);
            match &r {
                Ok(_) => info!("ensemble: job {i} finished"),
                Err(e) => info!("ensemble: job {i} failed: {e}"),
            }
            r
        })
        .collect();
    results.into_iter().collect()
}

/// Predicted class per row of a score or probability matrix (one example per row).
pub fn ballot(scores: &Matrix) -> Vec<usize> {
    (0..scores.rows()).map(|r| scores.argmax_row(r)).collect()
}

/// Outcome of the vote on one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Election {
    pub winner: usize,
    /// Votes cast for the winner.
    pub support: usize,
    /// Distinct classes that received at least one vote.
    pub unique: usize,
}

/// Elects one class per sample from one ballot per model.
///
/// Ties go to the lowest class index.
///
/// # Errors
/// - [`AntError::DimensionMismatch`] if the ballots cover different numbers of samples.
/// - [`AntError::InvalidTarget`] if a vote names a class `>= classes`.
pub fn plurality_vote(ballots: &[Vec<usize>], classes: usize) -> Result<Vec<Election>> {
    let Some(first) = ballots.first() else {
        return Ok(Vec::new());
    };
    let samples = first.len();
    for b in ballots {
        if b.len() != samples {
            return Err(AntError::mismatch("plurality vote", (1, samples), (1, b.len())));
        }
        if let Some(&bad) = b.iter().find(|&&v| v >= classes) {
            return Err(AntError::InvalidTarget(format!("vote for class {bad} of {classes}")));
        }
    }

    Ok((0..samples)
        .into_par_iter()
        .map(|s| {
            let mut tally = vec![0usize; classes];
            for b in ballots {
                tally[b[s]] += 1;
            }
            let winner = (1..classes).fold(0, |w, c| if tally[c] > tally[w] { c } else { w });
            Election {
                winner,
                support: tally[winner],
                unique: tally.iter().filter(|&&n| n > 0).count(),
            }
        })
        .collect())
}
