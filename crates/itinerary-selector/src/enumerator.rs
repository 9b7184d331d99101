//! Diamond enumeration of leg-option index tuples
//!
//! Walks the index space `[0, d_1) x ... x [0, d_n)` starting at the
//! top-left corner, which is assumed to be the best tuple:
//!
//! ```text
//! phase 1: (0,0) (1,1) (2,2) ...        while the rating matches (0,...,0)
//! phase 2: sum=1: (1,0) (0,1)
//!          sum=2: (2,0) (0,2)            (1,1) already emitted, skipped
//!          sum=3: (3,0) (2,1) (1,2) (0,3)
//!          ...                           up to sum = Σ(d_i - 1)
//! ```
//!
//! Within a shell tuples come in reverse-lexicographic order. Every tuple is
//! produced exactly once.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Diagonal,
    Shell,
    Done,
}

/// Lazy, restartable tuple generator
pub struct DiamondEnumerator<F, T> {
    dims: Vec<usize>,
    rating: F,
    origin_rating: Option<T>,
    phase: Phase,
    current: Vec<usize>,
    /// Number of diagonal tuples emitted so far
    diagonal: usize,
    shell_sum: usize,
    max_sum: usize,
    shell_started: bool,
}

impl<F, T> DiamondEnumerator<F, T>
where
    F: Fn(&[usize]) -> T,
    T: PartialEq,
{
    pub fn new(dims: Vec<usize>, rating: F) -> Self {
        let max_sum = dims.iter().map(|d| d.saturating_sub(1)).sum();
        let n = dims.len();
        Self {
            dims,
            rating,
            origin_rating: None,
            phase: Phase::Start,
            current: vec![0; n],
            diagonal: 0,
            shell_sum: 0,
            max_sum,
            shell_started: false,
        }
    }

    /// Rewind to the first tuple
    pub fn restart(&mut self) {
        self.origin_rating = None;
        self.phase = Phase::Start;
        self.current.iter_mut().for_each(|x| *x = 0);
        self.diagonal = 0;
        self.shell_sum = 0;
        self.shell_started = false;
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of tuples the full walk produces
    pub fn total(&self) -> usize {
        if self.dims.is_empty() {
            return 0;
        }
        self.dims.iter().product()
    }

    /// How many tuples the diagonal phase produced
    pub fn diagonal_len(&self) -> usize {
        self.diagonal
    }

    fn next_diagonal(&mut self) -> Option<Vec<usize>> {
        let k = self.diagonal;
        if self.dims.iter().any(|&d| k >= d) {
            return None;
        }
        let candidate = vec![k; self.dims.len()];
        if self.dims.len() > 1 && self.origin_rating.as_ref() != Some(&(self.rating)(&candidate)) {
            return None;
        }
        self.diagonal += 1;
        Some(candidate)
    }

    /// Greedily maximize coordinates `from..` left to right against `remainder`.
    fn fill_from(&mut self, from: usize, mut remainder: usize) -> bool {
        for i in from..self.dims.len() {
            let x = remainder.min(self.dims[i] - 1);
            self.current[i] = x;
            remainder -= x;
        }
        remainder == 0
    }

    /// Advance to the next tuple of the current shell.
    fn step_in_shell(&mut self) -> bool {
        let mut suffix_sum = 0;
        let mut suffix_cap = 0;
        for i in (0..self.dims.len()).rev() {
            if self.current[i] > 0 && suffix_sum < suffix_cap {
                self.current[i] -= 1;
                return self.fill_from(i + 1, suffix_sum + 1);
            }
            suffix_sum += self.current[i];
            suffix_cap += self.dims[i] - 1;
        }
        false
    }

    fn emitted_on_diagonal(&self) -> bool {
        let first = self.current[0];
        first < self.diagonal && self.current.iter().all(|&x| x == first)
    }

    fn next_shell(&mut self) -> Option<Vec<usize>> {
        loop {
            let positioned = if self.shell_started {
                self.step_in_shell()
            } else {
                self.shell_started = true;
                self.shell_sum = 1;
                self.shell_sum <= self.max_sum && self.fill_from(0, self.shell_sum)
            };

            if !positioned {
                if !self.shell_started || self.shell_sum >= self.max_sum {
                    return None;
                }
                self.shell_sum += 1;
                if !self.fill_from(0, self.shell_sum) {
                    return None;
                }
            }

            if !self.emitted_on_diagonal() {
                return Some(self.current.clone());
            }
        }
    }
}

impl<F, T> Iterator for DiamondEnumerator<F, T>
where
    F: Fn(&[usize]) -> T,
    T: PartialEq,
{
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.phase {
                Phase::Start => {
                    if self.dims.is_empty() || self.dims.contains(&0) {
                        self.phase = Phase::Done;
                        return None;
                    }
                    let origin = vec![0; self.dims.len()];
                    self.origin_rating = Some((self.rating)(&origin));
                    self.diagonal = 1;
                    self.phase = Phase::Diagonal;
                    return Some(origin);
                }
                Phase::Diagonal => match self.next_diagonal() {
                    Some(tuple) => return Some(tuple),
                    None => {
                        debug!("Diagonal phase ended after {} tuples", self.diagonal);
                        self.phase = Phase::Shell;
                    }
                },
                Phase::Shell => match self.next_shell() {
                    Some(tuple) => return Some(tuple),
                    None => self.phase = Phase::Done,
                },
                Phase::Done => return None,
            }
        }
    }
}
