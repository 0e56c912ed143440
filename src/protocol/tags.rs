//! Tag grammar (spec.md §6 "Event wire format"). Tags are built and read as
//! raw string arrays, mirroring the teacher's `tollgate::protocol` approach
//! of indexing `tag_array[n]` rather than modeling each tag as its own
//! struct — the wire format is a flat list of string arrays, so the parser
//! stays a flat `match` over `tag_array[0]`.

use nostr::{Event, Tag};

pub fn tag(values: Vec<String>) -> Option<Tag> {
    Tag::parse(values).ok()
}

/// Read every tag whose first element matches `name`, as a slice of its
/// remaining elements. Unknown tags are silently skipped elsewhere; this
/// helper just finds the ones a caller asked for.
pub fn tags_named<'a>(event: &'a Event, name: &str) -> Vec<Vec<&'a str>> {
    event
        .tags
        .iter()
        .filter_map(|t| {
            let slice = t.as_slice();
            if slice.first().map(|s| s.as_str()) == Some(name) {
                Some(slice.iter().skip(1).map(|s| s.as_str()).collect())
            } else {
                None
            }
        })
        .collect()
}

/// Read the first tag named `name`, if any.
pub fn first_tag_named<'a>(event: &'a Event, name: &str) -> Option<Vec<&'a str>> {
    tags_named(event, name).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{sign, ADVERTISEMENT_KIND};
    use nostr::Keys;

    #[test]
    fn tags_named_finds_matching_tags() {
        let keys = Keys::generate();
        let tags = vec![
            tag(vec!["metric".into(), "bytes".into()]).unwrap(),
            tag(vec![
                "price_per_step".into(),
                "cashu".into(),
                "1".into(),
                "sat".into(),
                "https://mint".into(),
                "1".into(),
            ])
            .unwrap(),
            tag(vec![
                "price_per_step".into(),
                "cashu".into(),
                "2".into(),
                "sat".into(),
                "https://mint2".into(),
                "1".into(),
            ])
            .unwrap(),
        ];
        let event = sign(ADVERTISEMENT_KIND, tags, &keys).unwrap();

        assert_eq!(tags_named(&event, "price_per_step").len(), 2);
        assert_eq!(first_tag_named(&event, "metric"), Some(vec!["bytes"]));
        assert!(first_tag_named(&event, "missing").is_none());
    }
}
