//! Dynamic-programming beat tracker
//!
//! Given an onset envelope and a beat period (in frames), every frame gets a
//! cumulative score: its own smoothed onset strength plus the best score of
//! a predecessor between half and twice a period earlier, penalised by how
//! far that gap is from the period in log space. The beat sequence is read
//! back from the best late peak through the stored predecessors.

use tracing::trace;

/// Predecessor of frames that start a beat sequence
const NO_PREDECESSOR: isize = -1;

/// Track beats through an onset envelope
///
/// Returns beat positions as frame indices in ascending order. An empty
/// result means no beat could be placed (flat envelope or no frames).
pub fn track_beats(onsets: &[f64], period: f64, tightness: f64, trim: bool) -> Vec<usize> {
    let period = period.round() as usize;
    if onsets.is_empty() || period == 0 {
        return Vec::new();
    }

    let Some(normalized) = normalize_onsets(onsets) else {
        return Vec::new();
    };

    let local = local_score(&normalized, period);
    let (backlink, cumulative) = dynamic_program(&local, period, tightness);

    let Some(tail) = last_beat(&cumulative) else {
        return Vec::new();
    };

    let mut beats = vec![tail];
    let mut current = tail;
    while backlink[current] >= 0 {
        current = backlink[current] as usize;
        beats.push(current);
    }
    beats.reverse();

    trace!("DP tracker placed {} beats (period {} frames)", beats.len(), period);

    trim_beats(&local, beats, trim)
}

/// Divide by the sample standard deviation; `None` for a constant envelope
fn normalize_onsets(onsets: &[f64]) -> Option<Vec<f64>> {
    if onsets.len() < 2 {
        return None;
    }
    let n = onsets.len() as f64;
    let mean = onsets.iter().sum::<f64>() / n;
    let var = onsets.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std <= 0.0 || !std.is_finite() {
        return None;
    }
    Some(onsets.iter().map(|x| x / std).collect())
}

/// Onsets convolved with a Gaussian a fraction of a period wide
fn local_score(onsets: &[f64], period: usize) -> Vec<f64> {
    let p = period as isize;
    let window: Vec<f64> = (-p..=p)
        .map(|x| (-0.5 * (x as f64 * 32.0 / period as f64).powi(2)).exp())
        .collect();
    convolve_same(onsets, &window)
}

/// Forward pass: cumulative scores and best predecessor per frame
fn dynamic_program(local: &[f64], period: usize, tightness: f64) -> (Vec<isize>, Vec<f64>) {
    let n = local.len();
    let p = period as f64;

    // Offsets from -2 periods up to -period/2, and their transition cost
    let earliest = -2 * period as isize;
    let latest = -((p / 2.0).round() as isize);
    let offsets: Vec<isize> = (earliest..=latest).collect();
    let penalty: Vec<f64> = offsets
        .iter()
        .map(|&o| -tightness * ((-o) as f64 / p).ln().powi(2))
        .collect();

    let max_local = local.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut backlink = vec![NO_PREDECESSOR; n];
    let mut cumulative = vec![0.0f64; n];
    let mut first_beat = true;

    for i in 0..n {
        let mut best_idx = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (j, (&offset, &cost)) in offsets.iter().zip(penalty.iter()).enumerate() {
            let pos = i as isize + offset;
            // Predecessors before the signal start contribute no score
            let score = if pos >= 0 {
                cost + cumulative[pos as usize]
            } else {
                cost
            };
            if score > best_score {
                best_score = score;
                best_idx = j;
            }
        }

        cumulative[i] = local[i] + best_score;

        if first_beat && local[i] < 0.01 * max_local {
            backlink[i] = NO_PREDECESSOR;
        } else {
            backlink[i] = i as isize + offsets[best_idx];
            first_beat = false;
        }
    }

    (backlink, cumulative)
}

/// Last local maximum of the cumulative score above half the median peak
fn last_beat(cumulative: &[f64]) -> Option<usize> {
    let n = cumulative.len();
    let is_peak = |i: usize| {
        let prev = if i == 0 { cumulative[0] } else { cumulative[i - 1] };
        let next = if i + 1 == n { cumulative[i] } else { cumulative[i + 1] };
        cumulative[i] > prev && cumulative[i] >= next
    };

    let peaks: Vec<usize> = (0..n).filter(|&i| is_peak(i)).collect();
    if peaks.is_empty() {
        return None;
    }

    let mut peak_scores: Vec<f64> = peaks.iter().map(|&i| cumulative[i]).collect();
    let median = median(&mut peak_scores);

    peaks
        .into_iter()
        .rev()
        .find(|&i| cumulative[i] * 2.0 > median)
}

/// Drop weak beats from both ends of the sequence
///
/// With `trim` the cut-off is half the RMS of the beat strengths smoothed by
/// a unit-gain 5-point Hann window, otherwise zero. Beats strictly inside
/// the first and last strong beat are kept whatever their strength.
fn trim_beats(local: &[f64], beats: Vec<usize>, trim: bool) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }

    let strengths: Vec<f64> = beats.iter().map(|&b| local[b]).collect();

    let threshold = if trim {
        let window = hann_periodic(5);
        let gain: f64 = window.iter().sum();
        let kernel: Vec<f64> = window.iter().map(|w| w / gain).collect();
        let smoothed = convolve_same(&strengths, &kernel);
        let mean_sq = smoothed.iter().map(|s| s * s).sum::<f64>() / smoothed.len() as f64;
        0.5 * mean_sq.sqrt()
    } else {
        0.0
    };

    let first = strengths.iter().position(|&s| s > threshold);
    let last = strengths.iter().rposition(|&s| s > threshold);
    match (first, last) {
        (Some(first), Some(last)) => beats[first..=last].to_vec(),
        _ => Vec::new(),
    }
}

/// Convolution trimmed to the length of `signal`, kernel centred
fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len() as isize;
    let m = kernel.len() as isize;
    let center = (m - 1) / 2;

    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let j = i + center - k as isize;
                if j >= 0 && j < n {
                    acc += signal[j as usize] * w;
                }
            }
            acc
        })
        .collect()
}

fn hann_periodic(size: usize) -> Vec<f64> {
    use std::f64::consts::PI;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
