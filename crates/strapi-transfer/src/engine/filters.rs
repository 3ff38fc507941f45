//! Stage selection from `exclude` / `only`.

use crate::core::TransferStage;

use super::options::TransferGroupFilter;

/// Whether `stage` is left out for the given filters.
///
/// Pure function of its arguments. The schemas stage is always kept by `only`
/// because archives need schemas for the integrity check on import; only an
/// explicit `exclude` of `schemas` drops it.
pub fn should_skip_stage(
    exclude: &[TransferGroupFilter],
    only: &[TransferGroupFilter],
    stage: TransferStage,
) -> bool {
    let excluded = exclude.iter().any(|f| f.covers(stage));
    if excluded {
        return true;
    }

    if only.is_empty() || stage == TransferStage::Schemas {
        return false;
    }

    !only.iter().any(|f| f.covers(stage))
}

/// Stages to run, in execution order.
pub fn selected_stages(
    exclude: &[TransferGroupFilter],
    only: &[TransferGroupFilter],
) -> Vec<TransferStage> {
    TransferStage::ORDER
        .iter()
        .copied()
        .filter(|stage| !should_skip_stage(exclude, only, *stage))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::options::TransferGroupFilter::*;

    #[test]
    fn test_no_filters_runs_everything() {
        assert_eq!(selected_stages(&[], &[]), TransferStage::ORDER.to_vec());
    }

    #[test]
    fn test_only_content() {
        let stages = selected_stages(&[], &[Content]);
        assert_eq!(
            stages,
            vec![
                TransferStage::Schemas,
                TransferStage::Entities,
                TransferStage::Links
            ]
        );
    }

    #[test]
    fn test_exclude_files_and_config() {
        let stages = selected_stages(&[Files, Config], &[]);
        assert!(!stages.contains(&TransferStage::Media));
        assert!(!stages.contains(&TransferStage::Configuration));
        assert!(stages.contains(&TransferStage::Entities));
    }

    #[test]
    fn test_exclude_links_keeps_entities() {
        assert!(should_skip_stage(&[Links], &[], TransferStage::Links));
        assert!(!should_skip_stage(&[Links], &[], TransferStage::Entities));
    }

    #[test]
    fn test_schemas_only_dropped_by_exclude() {
        assert!(!should_skip_stage(&[], &[Files], TransferStage::Schemas));
        assert!(should_skip_stage(&[Schemas], &[], TransferStage::Schemas));
    }

    #[test]
    fn test_is_pure() {
        for stage in TransferStage::ORDER {
            let first = should_skip_stage(&[Files], &[Content, Config], stage);
            for _ in 0..3 {
                assert_eq!(first, should_skip_stage(&[Files], &[Content, Config], stage));
            }
        }
    }
}
