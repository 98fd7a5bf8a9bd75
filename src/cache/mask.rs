//! Suppression vectors for the negative cache
//!
//! A stored probability map marks as suppressible every class whose
//! probability falls strictly inside the mask window: mass that was neither
//! confidently ruled out nor confidently asserted.

use crate::config::ThresholdWindow;

/// Binary suppression vector: `1.0` where `lower < p < upper`, else `0.0`
pub fn negative_mask(probability_map: &[f32], window: ThresholdWindow) -> Vec<f32> {
    probability_map
        .iter()
        .map(|&p| if window.contains(p) { 1.0 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_window() {
        let window = ThresholdWindow::new(0.03, 1.0);
        let mask = negative_mask(&[0.01, 0.03, 0.2, 0.76, 1.0], window);
        assert_eq!(mask, vec![0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_mask_empty_map() {
        assert!(negative_mask(&[], ThresholdWindow::new(0.0, 1.0)).is_empty());
    }
}
