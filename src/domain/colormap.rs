// ============================================================
// Layer 3 — PASCAL-VOC Color Map
// ============================================================
// Deterministic palette that turns integer class labels into RGB
// colours. The bits of the class index are spread over the three
// channels, most significant bit first:
//
//   index bit 0 → R, bit 1 → G, bit 2 → B, then shift by 3
//   repeated 8 times, filling bits 7..0 of each channel
//
//   0 → (0,0,0)   1 → (128,0,0)   2 → (0,128,0)   3 → (128,128,0)
//
// Reference: PASCAL VOC development kit (VOClabelcolormap)

/// RGB triple for each index in `0..n`.
pub fn color_map(n: usize) -> Vec<[u8; 3]> {
    (0..n).map(color_of).collect()
}

/// Same palette scaled to `[0, 1]`.
pub fn color_map_normalized(n: usize) -> Vec<[f32; 3]> {
    color_map(n)
        .into_iter()
        .map(|[r, g, b]| [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0])
        .collect()
}

fn color_of(index: usize) -> [u8; 3] {
    let (mut r, mut g, mut b) = (0u8, 0u8, 0u8);
    let mut c = index;
    for j in 0..8 {
        r |= bit(c, 0) << (7 - j);
        g |= bit(c, 1) << (7 - j);
        b |= bit(c, 2) << (7 - j);
        c >>= 3;
    }
    [r, g, b]
}

fn bit(value: usize, idx: usize) -> u8 {
    ((value >> idx) & 1) as u8
}

/// Render a row-major class map as interleaved RGB bytes.
/// Labels beyond the palette wrap around the 256-entry VOC table.
pub fn labels_to_rgb(labels: &[i64], palette: &[[u8; 3]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(labels.len() * 3);
    for &label in labels {
        let colour = if palette.is_empty() {
            [0, 0, 0]
        } else {
            palette[label.rem_euclid(palette.len() as i64) as usize]
        };
        out.extend_from_slice(&colour);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_voc_entries() {
        let cmap = color_map(9);
        assert_eq!(cmap[0], [0, 0, 0]);
        assert_eq!(cmap[1], [128, 0, 0]);
        assert_eq!(cmap[2], [0, 128, 0]);
        assert_eq!(cmap[3], [128, 128, 0]);
        assert_eq!(cmap[4], [0, 0, 128]);
        assert_eq!(cmap[8], [64, 0, 0]);
    }

    #[test]
    fn test_color_map_is_deterministic() {
        assert_eq!(color_map(256), color_map(256));
        assert_eq!(color_map(0).len(), 0);
    }

    #[test]
    fn test_normalized_is_scaled_copy() {
        let raw = color_map(21);
        let norm = color_map_normalized(21);
        for (a, b) in raw.iter().zip(norm.iter()) {
            for c in 0..3 {
                assert!((a[c] as f32 / 255.0 - b[c]).abs() < 1e-6);
                assert!((0.0..=1.0).contains(&b[c]));
            }
        }
    }

    #[test]
    fn test_labels_to_rgb_layout() {
        let palette = color_map(4);
        let rgb = labels_to_rgb(&[0, 1, 3], &palette);
        assert_eq!(rgb, vec![0, 0, 0, 128, 0, 0, 128, 128, 0]);
    }
}
