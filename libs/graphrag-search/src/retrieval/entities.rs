use std::cmp::Ordering;

use regex::Regex;

use crate::models::Entity;

pub fn get_entity_by_name(entities: &[Entity], entity_name: &str) -> Vec<Entity> {
    entities
        .iter()
        .filter(|entity| entity.title.eq_ignore_ascii_case(entity_name))
        .cloned()
        .collect()
}

/// Whether `title` occurs in `text` as a standalone term, ignoring case.
pub fn mentions_title(text: &str, title: &str) -> bool {
    let title = title.trim();
    if title.is_empty() {
        return false;
    }

    let pattern = format!(r"(?i)(^|[^\w]){}($|[^\w])", regex::escape(title));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => text.to_lowercase().contains(&title.to_lowercase()),
    }
}

/// Entities whose title is mentioned in `text`, highest rank first.
pub fn find_mentioned_entities(text: &str, entities: &[Entity]) -> Vec<Entity> {
    let mut mentioned: Vec<Entity> = entities
        .iter()
        .filter(|entity| mentions_title(text, &entity.title))
        .cloned()
        .collect();

    sort_entities_by_rank(&mut mentioned);
    mentioned
}

pub fn sort_entities_by_rank(entities: &mut [Entity]) {
    entities.sort_by(|a, b| match b.rank.cmp(&a.rank) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}
