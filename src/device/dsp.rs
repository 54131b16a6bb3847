// src/device/dsp.rs

/// Split interleaved frames onto per-channel queues; a trailing partial frame is dropped.
pub fn append_interleaved_to_planar(interleaved: &[f32], planar: &mut [Vec<f32>]) {
    let width = planar.len();
    if width == 0 {
        return;
    }
    interleaved.chunks_exact(width).for_each(|frame| {
        planar.iter_mut().zip(frame).for_each(|(lane, &s)| lane.push(s));
    });
}

/// Frames available on every channel.
pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(Vec::len).min().unwrap_or(0)
}

/// Remove up to `frames` from the front of each channel.
pub fn take_from_planar(planar: &mut [Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    planar
        .iter_mut()
        .map(|lane| {
            let n = frames.min(lane.len());
            lane.drain(..n).collect()
        })
        .collect()
}

pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar_len(planar);
    (0..frames)
        .flat_map(|f| planar.iter().map(move |lane| lane[f]))
        .collect()
}

/// Map `in_ch` interleaved channels onto `out_ch`. Going to mono averages,
/// otherwise output channel `n` copies input channel `n % in_ch`.
pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch || in_ch == 0 || out_ch == 0 {
        return input.to_vec();
    }
    let mut out = Vec::with_capacity(input.len() / in_ch * out_ch);
    for frame in input.chunks_exact(in_ch) {
        if out_ch == 1 {
            out.push(frame.iter().sum::<f32>() / in_ch as f32);
        } else {
            out.extend((0..out_ch).map(|n| frame[n % in_ch]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_source_fills_every_device_channel() {
        assert_eq!(
            updown_mix_interleaved(&[0.5, -0.5], 1, 3),
            vec![0.5, 0.5, 0.5, -0.5, -0.5, -0.5]
        );
    }

    #[test]
    fn stereo_to_mono_averages() {
        assert_eq!(updown_mix_interleaved(&[1.0, 0.0, 0.2, 0.4], 2, 1), vec![0.5, 0.3]);
    }

    #[test]
    fn staged_frames_come_out_in_order() {
        let mut planar = vec![Vec::new(), Vec::new()];
        append_interleaved_to_planar(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], &mut planar);
        let head = take_from_planar(&mut planar, 2);
        assert_eq!(interleave(&head), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(planar_len(&planar), 1);
    }
}
