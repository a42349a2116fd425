use std::collections::HashMap;

use crate::models::{CommunityReport, Entity};

/// Reports linked to the selected entities, ranked by the number of selected
/// entities they cover and then by rank.
pub fn get_candidate_communities(selected_entities: &[Entity], community_reports: &[CommunityReport]) -> Vec<CommunityReport> {
    if selected_entities.is_empty() || community_reports.is_empty() {
        return Vec::new();
    }

    let mut community_matches: HashMap<&str, usize> = HashMap::new();
    for entity in selected_entities {
        for report in community_reports {
            let linked = entity.community_ids.iter().any(|id| *id == report.community_id)
                || report.source_entity_ids.iter().any(|id| *id == entity.id);
            if linked {
                *community_matches.entry(report.id.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut selected: Vec<(usize, &CommunityReport)> = community_reports
        .iter()
        .filter_map(|report| community_matches.get(report.id.as_str()).map(|matches| (*matches, report)))
        .collect();

    selected.sort_by(|(a_matches, a), (b_matches, b)| {
        b_matches
            .cmp(a_matches)
            .then(b.rank.cmp(&a.rank))
            .then(a.id.cmp(&b.id))
    });

    selected.into_iter().map(|(_, report)| report.clone()).collect()
}
