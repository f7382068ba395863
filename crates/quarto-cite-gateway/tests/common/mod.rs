//! Test doubles for the host and citation engine.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use quarto_cite_gateway::{
    CitationEngine, ClusterResult, EngineFactory, EngineSystem, Error, GatewayConfig, Host,
    ItemId, ItemKey, OutputFormat, Result, SearchCondition, SearchField, SearchOperator, Session,
    StyleClass,
};
use serde_json::{Value, json};

pub const APA_URL: &str = "http://www.zotero.org/styles/apa";
pub const CHICAGO_NOTE_URL: &str = "http://www.zotero.org/styles/chicago-note-bibliography";
pub const BROKEN_URL: &str = "http://www.zotero.org/styles/broken";

/// In-memory host. Items carry `creator`, `title` and `date` string fields
/// that the search matches against.
#[derive(Default)]
pub struct FakeHost {
    pub items: Vec<(ItemKey, ItemId, Value)>,
    pub styles: HashMap<String, String>,
    pub locales: HashMap<String, String>,
    pub bibliography_locale: Option<String>,
    pub app_locale: Option<String>,
}

impl FakeHost {
    pub fn with_item(mut self, key: &str, id: ItemId, data: Value) -> Self {
        self.items.push((ItemKey::parse(key).unwrap(), id, data));
        self
    }

    pub fn with_style(mut self, url: &str, xml: &str) -> Self {
        self.styles.insert(url.to_string(), xml.to_string());
        self
    }
}

fn field_matches(data: &Value, condition: &SearchCondition) -> bool {
    let field = match condition.field {
        SearchField::Creator => "creator",
        SearchField::Title => "title",
        SearchField::Date => "date",
    };
    let Some(value) = data.get(field).and_then(Value::as_str) else {
        return false;
    };
    match condition.operator {
        SearchOperator::Contains => value.contains(condition.value.as_str()),
        SearchOperator::Is => value == condition.value,
    }
}

impl Host for FakeHost {
    fn item_id(&self, key: &ItemKey) -> Result<Option<ItemId>> {
        Ok(self
            .items
            .iter()
            .find(|(k, _, _)| k == key)
            .map(|(_, id, _)| *id))
    }

    fn item_data(&self, id: ItemId) -> Result<Option<Value>> {
        Ok(self
            .items
            .iter()
            .find(|(_, i, _)| *i == id)
            .map(|(_, _, data)| data.clone()))
    }

    fn search(&self, conditions: &[SearchCondition]) -> Result<Vec<ItemId>> {
        Ok(self
            .items
            .iter()
            .filter(|(_, _, data)| conditions.iter().all(|c| field_matches(data, c)))
            .map(|(_, id, _)| *id)
            .collect())
    }

    fn style_xml(&self, style_url: &str) -> Result<Option<String>> {
        Ok(self.styles.get(style_url).cloned())
    }

    fn locale_xml(&self, lang: &str) -> Result<Option<String>> {
        Ok(self.locales.get(lang).cloned())
    }

    fn bibliography_locale(&self) -> Option<String> {
        self.bibliography_locale.clone()
    }

    fn app_locale(&self) -> Option<String> {
        self.app_locale.clone()
    }
}

/// What the fake factory was asked to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creation {
    pub style_xml: String,
    pub locale: String,
}

/// Builds [`FakeEngine`]s. Styles whose XML contains `broken` fail to load;
/// styles containing `class="note"` are note styles.
#[derive(Default, Clone)]
pub struct FakeFactory {
    pub created: Rc<RefCell<Vec<Creation>>>,
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn create(
        &self,
        _sys: &dyn EngineSystem,
        style_xml: &str,
        locale: &str,
    ) -> Result<FakeEngine> {
        if style_xml.contains("broken") {
            return Err(Error::Engine("style could not be parsed".to_string()));
        }
        self.created.borrow_mut().push(Creation {
            style_xml: style_xml.to_string(),
            locale: locale.to_string(),
        });
        let class = if style_xml.contains("class=\"note\"") {
            StyleClass::Note
        } else {
            StyleClass::InText
        };
        Ok(FakeEngine {
            class,
            format: None,
            clusters: Vec::new(),
            items: Vec::new(),
        })
    }
}

/// Renders clusters as `(title; title)` from items fetched through the
/// engine system, and reports every cluster on each insertion, keyed by its
/// insertion position.
pub struct FakeEngine {
    class: StyleClass,
    format: Option<OutputFormat>,
    clusters: Vec<String>,
    items: Vec<ItemId>,
}

fn title_of(sys: &dyn EngineSystem, id: &str) -> Result<String> {
    let item = sys.retrieve_item(id)?;
    Ok(item
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string())
}

impl CitationEngine for FakeEngine {
    fn set_output_format(&mut self, format: OutputFormat) -> Result<()> {
        self.format = Some(format);
        Ok(())
    }

    fn update_items(&mut self, _sys: &dyn EngineSystem, ids: &[ItemId]) -> Result<()> {
        self.items = ids.to_vec();
        Ok(())
    }

    fn append_citation_cluster(
        &mut self,
        sys: &dyn EngineSystem,
        citation: &Value,
    ) -> Result<Vec<ClusterResult>> {
        assert_eq!(self.format, Some(OutputFormat::Html));
        let items = citation
            .get("citationItems")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Engine("citation has no citationItems".to_string()))?;
        let titles = items
            .iter()
            .map(|item| {
                let id = match &item["id"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                title_of(sys, &id)
            })
            .collect::<Result<Vec<_>>>()?;
        self.clusters.push(format!("({})", titles.join("; ")));

        Ok(self
            .clusters
            .iter()
            .enumerate()
            .map(|(i, text)| ClusterResult::new(i as i64, text.as_str()))
            .collect())
    }

    fn make_bibliography(
        &mut self,
        sys: &dyn EngineSystem,
        options: Option<&Value>,
    ) -> Result<Option<Value>> {
        if self.items.is_empty() {
            return Ok(None);
        }
        let entries = self
            .items
            .iter()
            .map(|id| {
                title_of(sys, &id.to_string())
                    .map(|t| format!("<div class=\"csl-entry\">{}</div>", t))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(json!([{"options": options}, entries])))
    }

    fn style_class(&self) -> StyleClass {
        self.class
    }
}

pub fn sample_host() -> FakeHost {
    FakeHost::default()
        .with_item(
            "ABCD1234",
            11,
            json!({"id": 11, "title": "Origin of Species", "creator": "Darwin", "date": "1859"}),
        )
        .with_item(
            "EFGH5678",
            12,
            json!({"id": 12, "title": "Descent of Man", "creator": "Darwin", "date": "1871"}),
        )
        .with_item(
            "3_GROUP001",
            31,
            json!({"id": 31, "title": "Über Kunst", "creator": "Müller", "date": "1901"}),
        )
        .with_style(APA_URL, "<style class=\"in-text\">apa</style>")
        .with_style(CHICAGO_NOTE_URL, "<style class=\"note\">chicago</style>")
        .with_style(BROKEN_URL, "<style>broken</style>")
}

pub fn sample_session() -> (Session<FakeHost, FakeFactory>, Rc<RefCell<Vec<Creation>>>) {
    let factory = FakeFactory::default();
    let created = factory.created.clone();
    (
        Session::new(sample_host(), factory, GatewayConfig::default()),
        created,
    )
}

pub fn citation(index: i64, ids: &[Value]) -> Value {
    let items: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
    json!({
        "citationItems": items,
        "properties": {"index": index, "noteIndex": 0}
    })
}
