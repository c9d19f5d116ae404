// ─── Catalog Parser ───
// Streams nested <region name="..."> elements into the region tree.
// Nesting depth is continent → country → subdivision.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::tree::Catalog;
use crate::core::error::{MapError, MapResult};
use crate::core::region::Region;

const REGION_TAG: &[u8] = b"region";
const NAME_ATTR: &str = "name";

/// A region element that has been entered but not yet closed.
struct OpenRegion {
    region: Region,
    path: Vec<usize>,
}

/// Single-use parser state. `parse` consumes it.
#[derive(Default)]
pub struct CatalogParser {
    roots: Vec<Region>,
    index: HashMap<String, Vec<usize>>,
    /// `None` marks a `region` element without a name; it is transparent.
    stack: Vec<Option<OpenRegion>>,
}

impl CatalogParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(mut self, xml: &str) -> MapResult<Catalog> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.name().as_ref() == REGION_TAG => self.enter(&e)?,
                Event::Empty(e) if e.name().as_ref() == REGION_TAG => {
                    self.enter(&e)?;
                    self.leave();
                }
                Event::End(e) if e.name().as_ref() == REGION_TAG => self.leave(),
                Event::Eof => break,
                _ => {}
            }
        }

        if !self.stack.is_empty() {
            return Err(MapError::CatalogParse(format!(
                "document ended with {} unclosed region element(s)",
                self.stack.len()
            )));
        }
        if self.roots.is_empty() {
            return Err(MapError::CatalogParse("no region elements found".into()));
        }

        debug!(
            "Parsed catalog: {} roots, {} indexed regions",
            self.roots.len(),
            self.index.len()
        );
        Ok(Catalog::from_parts(self.roots, self.index))
    }

    fn enter(&mut self, element: &BytesStart<'_>) -> MapResult<()> {
        let name = match element
            .try_get_attribute(NAME_ATTR)
            .map_err(quick_xml::Error::from)?
        {
            Some(attr) => attr.unescape_value()?.into_owned(),
            None => {
                self.stack.push(None);
                return Ok(());
            }
        };

        let parent = self.stack.iter().rev().flatten().next();
        let depth = self.stack.iter().flatten().count();

        let download_id = match (depth, parent) {
            (1, _) => capitalize_first(&name),
            (_, Some(parent)) => {
                capitalize_first(&format!("{}_{}", parent.region.download_id, name))
            }
            (_, None) => capitalize_first(&format!("_{}", name)),
        };

        let path = match parent {
            Some(parent) => {
                let mut path = parent.path.clone();
                path.push(parent.region.subregions.len());
                path
            }
            None => vec![self.roots.len()],
        };

        // Registered before children are parsed.
        if self.index.insert(download_id.clone(), path.clone()).is_some() {
            debug!("Duplicate download identifier {download_id}, keeping the later region");
        }

        self.stack.push(Some(OpenRegion {
            region: Region::new(name, download_id),
            path,
        }));
        Ok(())
    }

    fn leave(&mut self) {
        let Some(Some(done)) = self.stack.pop() else {
            return;
        };

        match self.stack.iter_mut().rev().flatten().next() {
            Some(parent) => parent.region.subregions.push(done.region),
            None => self.roots.push(done.region),
        }
    }
}

/// Upper-case the first character only; the remainder is kept verbatim.
///
/// Applied to the whole joined identifier, not per segment, which is the
/// naming scheme the map host uses for its files.
pub fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUROPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <regions_list>
            <region name="europe">
                <region name="ireland">
                    <region name="Leinster"/>
                    <region name="munster"/>
                </region>
                <region name="france"/>
            </region>
            <region name="asia">
                <region name="japan"/>
            </region>
        </regions_list>
    "#;

    #[test]
    fn builds_tree_and_identifiers() {
        let catalog = Catalog::parse(EUROPE).unwrap();
        let roots = catalog.roots();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].name, "europe");
        assert_eq!(roots[0].download_id, "_europe");

        let ireland = &roots[0].subregions[0];
        assert_eq!(ireland.download_id, "Ireland");
        assert_eq!(ireland.subregions[0].download_id, "Ireland_Leinster");
        // Only the first character of the joined identifier is capitalized.
        assert_eq!(ireland.subregions[1].download_id, "Ireland_munster");

        assert_eq!(roots[0].subregions[1].download_id, "France");
        assert_eq!(roots[1].subregions[0].download_id, "Japan");
    }

    #[test]
    fn indexes_every_region() {
        let catalog = Catalog::parse(EUROPE).unwrap();
        for id in [
            "_europe",
            "Ireland",
            "Ireland_Leinster",
            "Ireland_munster",
            "France",
            "_asia",
            "Japan",
        ] {
            assert!(catalog.contains(id), "missing {id}");
        }
        assert_eq!(catalog.len(), 7);
    }

    #[test]
    fn parsing_is_deterministic() {
        let first = Catalog::parse(EUROPE).unwrap();
        let second = Catalog::parse(EUROPE).unwrap();

        let mut a = Vec::new();
        for root in first.roots() {
            root.walk(&mut |r| a.push((r.name.clone(), r.download_id.clone())));
        }
        let mut b = Vec::new();
        for root in second.roots() {
            root.walk(&mut |r| b.push((r.name.clone(), r.download_id.clone())));
        }
        assert_eq!(a, b);
    }

    #[test]
    fn nameless_regions_are_transparent() {
        let xml = r#"
            <region name="europe">
                <region>
                    <region name="ireland"/>
                </region>
            </region>
        "#;
        let catalog = Catalog::parse(xml).unwrap();
        let europe = &catalog.roots()[0];
        assert_eq!(europe.subregions.len(), 1);
        assert_eq!(europe.subregions[0].download_id, "Ireland");
    }

    #[test]
    fn rejects_document_without_regions() {
        let err = Catalog::parse("<regions></regions>").unwrap_err();
        assert!(matches!(err, MapError::CatalogParse(_)));
    }

    #[test]
    fn rejects_mismatched_tags() {
        let err = Catalog::parse(
            r#"<region name="europe"><region name="ireland"></country></region>"#,
        )
        .unwrap_err();
        assert!(matches!(err, MapError::Xml(_)));
    }

    #[test]
    fn rejects_unclosed_regions() {
        let err = Catalog::parse(r#"<region name="europe"><region name="ireland">"#).unwrap_err();
        assert!(matches!(err, MapError::CatalogParse(_) | MapError::Xml(_)));
    }

    #[test]
    fn capitalizes_first_character_only() {
        assert_eq!(capitalize_first("ireland_leinster"), "Ireland_leinster");
        assert_eq!(capitalize_first("_europe"), "_europe");
        assert_eq!(capitalize_first(""), "");
    }
}
