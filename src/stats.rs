use crate::{class_mapping::ClassMapping, mask::SegmentationMask, schema::ClassStatistic};

/// Pixel count and share of every class in the mapping, largest share first.
///
/// Classes absent from the mask are listed with a zero count. The sort is stable, so
/// equal percentages keep ascending class-id order.
pub fn compute_stats(mask: &SegmentationMask, mapping: &ClassMapping) -> Vec<ClassStatistic> {
    let mut counts = vec![0u64; mapping.len()];
    for &class_id in mask.iter() {
        if let Some(count) = counts.get_mut(usize::from(class_id)) {
            *count += 1;
        }
    }

    let total = mask.len();
    let mut stats: Vec<ClassStatistic> = counts
        .into_iter()
        .enumerate()
        .map(|(class_id, pixel_count)| ClassStatistic {
            class_id: class_id as u32,
            class_name: mapping.name(class_id).to_string(),
            pixel_count,
            percentage: if total == 0 {
                0.0
            } else {
                100.0 * pixel_count as f64 / total as f64
            },
        })
        .collect();

    stats.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));
    stats
}

/// Name and percentage of the first statistic, or `("", 0.0)`.
pub fn dominant_class(stats: &[ClassStatistic]) -> (&str, f64) {
    stats
        .first()
        .map_or(("", 0.0), |s| (s.class_name.as_str(), s.percentage))
}
