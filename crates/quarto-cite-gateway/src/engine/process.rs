/*
 * engine/process.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Citation engine running in a child process.
 */

//! Out-of-process citation engine.
//!
//! The engine speaks newline-delimited JSON on its stdin/stdout. The gateway
//! sends one request per operation:
//!
//! ```text
//! {"op":"create","style":"<csl xml>","locale":"en-US"}
//! {"op":"setOutputFormat","format":"html"}
//! {"op":"updateItems","ids":[1,2]}
//! {"op":"appendCitationCluster","citation":{...}}
//! {"op":"makeBibliography","options":null}
//! ```
//!
//! and reads lines until it sees `{"result": ...}` or `{"error": "..."}`.
//! Before answering, the engine may ask for data it needs:
//!
//! ```text
//! {"callback":"retrieveItem","id":"ITEM-1"}
//! {"callback":"retrieveLocale","lang":"en-US"}
//! ```
//!
//! Each callback gets exactly one reply line in the same result/error shape.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::engine::{CitationEngine, ClusterResult, EngineFactory, OutputFormat, StyleClass};
use crate::error::{Error, Result};
use crate::key::ItemId;
use crate::system::{EngineSystem, registry_key};

/// A message read from the engine.
#[derive(Debug, PartialEq)]
enum EngineMessage {
    RetrieveItem(String),
    RetrieveLocale(String),
    Result(Value),
    Error(String),
}

impl EngineMessage {
    fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::EngineProtocol(format!("undecodable engine output: {}", e)))?;
        let Value::Object(obj) = value else {
            return Err(Error::EngineProtocol(format!(
                "expected a JSON object from engine, got {}",
                line
            )));
        };

        if let Some(callback) = obj.get("callback") {
            return match callback.as_str() {
                Some("retrieveItem") => obj
                    .get("id")
                    .and_then(registry_key)
                    .map(EngineMessage::RetrieveItem)
                    .ok_or_else(|| {
                        Error::EngineProtocol("retrieveItem callback without an id".to_string())
                    }),
                Some("retrieveLocale") => obj
                    .get("lang")
                    .and_then(Value::as_str)
                    .map(|lang| EngineMessage::RetrieveLocale(lang.to_string()))
                    .ok_or_else(|| {
                        Error::EngineProtocol("retrieveLocale callback without a lang".to_string())
                    }),
                _ => Err(Error::EngineProtocol(format!(
                    "unknown engine callback: {}",
                    callback
                ))),
            };
        }

        if let Some(error) = obj.get("error") {
            let message = error.as_str().map_or_else(|| error.to_string(), str::to_string);
            return Ok(EngineMessage::Error(message));
        }

        match obj.get("result") {
            Some(result) => Ok(EngineMessage::Result(result.clone())),
            None => Err(Error::EngineProtocol(format!(
                "engine message has no result, error or callback: {}",
                line
            ))),
        }
    }
}

fn reply<T: Into<Value>>(answer: Result<T>) -> Value {
    let mut obj = Map::new();
    match answer {
        Ok(value) => obj.insert("result".to_string(), value.into()),
        Err(e) => obj.insert("error".to_string(), Value::String(e.to_string())),
    };
    Value::Object(obj)
}

/// The request/response conversation with an engine over any byte channel.
///
/// After an I/O or protocol failure the two sides can no longer be matched
/// up line for line, so the channel refuses every later request.
pub struct ChannelEngine<R, W> {
    reader: R,
    writer: W,
    style_class: StyleClass,
    out_of_sync: bool,
}

impl<R: BufRead, W: Write> ChannelEngine<R, W> {
    /// Send `create` over the channel and wait for the engine to accept the
    /// style. The reply carries the style's class.
    pub fn connect(
        reader: R,
        writer: W,
        sys: &dyn EngineSystem,
        style_xml: &str,
        locale: &str,
    ) -> Result<Self> {
        let mut engine = Self {
            reader,
            writer,
            style_class: StyleClass::InText,
            out_of_sync: false,
        };

        let result = engine.call(
            sys,
            json!({"op": "create", "style": style_xml, "locale": locale}),
        )?;
        let class = result
            .get("styleClass")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::EngineProtocol(format!("create reply has no styleClass: {}", result))
            })?;
        engine.style_class = class.parse()?;
        Ok(engine)
    }

    fn send(&mut self, message: &Value) -> Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn call(&mut self, sys: &dyn EngineSystem, request: Value) -> Result<Value> {
        if self.out_of_sync {
            return Err(Error::EngineProtocol(
                "engine channel is out of sync".to_string(),
            ));
        }

        let result = self.exchange(sys, request);
        if let Err(e) = &result
            && matches!(e, Error::EngineProtocol(_) | Error::Io(_) | Error::Json(_))
        {
            warn!(error = %e, "Engine channel out of sync; refusing further requests");
            self.out_of_sync = true;
        }
        result
    }

    /// Whether an earlier failure left the channel unusable.
    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync
    }

    fn exchange(&mut self, sys: &dyn EngineSystem, request: Value) -> Result<Value> {
        debug!(op = %request["op"], "Engine request");
        self.send(&request)?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(Error::EngineProtocol(
                    "engine closed its output before replying".to_string(),
                ));
            }
            if line.trim().is_empty() {
                continue;
            }

            match EngineMessage::parse(line.trim_end())? {
                EngineMessage::RetrieveItem(id) => {
                    let answer = sys.retrieve_item(&id);
                    if let Err(e) = &answer {
                        warn!(id = %id, error = %e, "Engine asked for an unavailable item");
                    }
                    self.send(&reply(answer))?;
                }
                EngineMessage::RetrieveLocale(lang) => {
                    let answer = sys.retrieve_locale(&lang);
                    self.send(&reply(answer))?;
                }
                EngineMessage::Result(value) => return Ok(value),
                EngineMessage::Error(message) => return Err(Error::Engine(message)),
            }
        }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: BufRead, W: Write> CitationEngine for ChannelEngine<R, W> {
    fn set_output_format(&mut self, format: OutputFormat) -> Result<()> {
        // Output format changes never need items or locales.
        struct NoCallbacks;
        impl EngineSystem for NoCallbacks {
            fn retrieve_locale(&self, _lang: &str) -> Result<Option<String>> {
                Ok(None)
            }
            fn retrieve_item(&self, id: &str) -> Result<Value> {
                Err(Error::UnknownItem(id.to_string()))
            }
        }

        self.call(
            &NoCallbacks,
            json!({"op": "setOutputFormat", "format": format.as_str()}),
        )?;
        Ok(())
    }

    fn update_items(&mut self, sys: &dyn EngineSystem, ids: &[ItemId]) -> Result<()> {
        self.call(sys, json!({"op": "updateItems", "ids": ids}))?;
        Ok(())
    }

    fn append_citation_cluster(
        &mut self,
        sys: &dyn EngineSystem,
        citation: &Value,
    ) -> Result<Vec<ClusterResult>> {
        let result = self.call(
            sys,
            json!({"op": "appendCitationCluster", "citation": citation}),
        )?;
        ClusterResult::parse_list(&result)
    }

    fn make_bibliography(
        &mut self,
        sys: &dyn EngineSystem,
        options: Option<&Value>,
    ) -> Result<Option<Value>> {
        let result = self.call(
            sys,
            json!({"op": "makeBibliography", "options": options}),
        )?;
        Ok(match result {
            Value::Null | Value::Bool(false) => None,
            other => Some(other),
        })
    }

    fn style_class(&self) -> StyleClass {
        self.style_class
    }
}

/// Spawns one engine process per instantiated style.
#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessEngineFactory {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// A [`ChannelEngine`] attached to a child process. The child is killed when
/// the engine is dropped.
pub struct ProcessEngine {
    channel: ChannelEngine<BufReader<ChildStdout>, ChildStdin>,
    child: Child,
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "Engine process already exited");
        }
        let _ = self.child.wait();
    }
}

impl EngineFactory for ProcessEngineFactory {
    type Engine = ProcessEngine;

    fn create(
        &self,
        sys: &dyn EngineSystem,
        style_xml: &str,
        locale: &str,
    ) -> Result<ProcessEngine> {
        debug!(program = %self.program.display(), "Spawning engine process");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(Error::EngineProtocol(
                "engine process has no stdio pipes".to_string(),
            ));
        };

        match ChannelEngine::connect(BufReader::new(stdout), stdin, sys, style_xml, locale) {
            Ok(channel) => Ok(ProcessEngine { channel, child }),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

impl CitationEngine for ProcessEngine {
    fn set_output_format(&mut self, format: OutputFormat) -> Result<()> {
        self.channel.set_output_format(format)
    }

    fn update_items(&mut self, sys: &dyn EngineSystem, ids: &[ItemId]) -> Result<()> {
        self.channel.update_items(sys, ids)
    }

    fn append_citation_cluster(
        &mut self,
        sys: &dyn EngineSystem,
        citation: &Value,
    ) -> Result<Vec<ClusterResult>> {
        self.channel.append_citation_cluster(sys, citation)
    }

    fn make_bibliography(
        &mut self,
        sys: &dyn EngineSystem,
        options: Option<&Value>,
    ) -> Result<Option<Value>> {
        self.channel.make_bibliography(sys, options)
    }

    fn style_class(&self) -> StyleClass {
        self.channel.style_class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FixedSystem;

    impl EngineSystem for FixedSystem {
        fn retrieve_locale(&self, lang: &str) -> Result<Option<String>> {
            Ok(Some(format!("<locale xml:lang=\"{}\"/>", lang)))
        }

        fn retrieve_item(&self, id: &str) -> Result<Value> {
            if id == "ITEM-1" {
                Ok(json!({"id": "ITEM-1", "title": "Known"}))
            } else {
                Err(Error::UnknownItem(id.to_string()))
            }
        }
    }

    fn engine_with_replies(replies: &str) -> ChannelEngine<Cursor<Vec<u8>>, Vec<u8>> {
        let script = format!("{{\"result\":{{\"styleClass\":\"note\"}}}}\n{}", replies);
        ChannelEngine::connect(
            Cursor::new(script.into_bytes()),
            Vec::new(),
            &FixedSystem,
            "<style/>",
            "de-DE",
        )
        .unwrap()
    }

    fn sent_lines(engine: ChannelEngine<Cursor<Vec<u8>>, Vec<u8>>) -> Vec<Value> {
        let (_, written) = engine.into_parts();
        String::from_utf8(written)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_message_parse() {
        assert_eq!(
            EngineMessage::parse(r#"{"callback":"retrieveItem","id":12}"#).unwrap(),
            EngineMessage::RetrieveItem("12".to_string())
        );
        assert_eq!(
            EngineMessage::parse(r#"{"callback":"retrieveLocale","lang":"fr-FR"}"#).unwrap(),
            EngineMessage::RetrieveLocale("fr-FR".to_string())
        );
        assert_eq!(
            EngineMessage::parse(r#"{"result":false}"#).unwrap(),
            EngineMessage::Result(json!(false))
        );
        assert_eq!(
            EngineMessage::parse(r#"{"error":"bad style"}"#).unwrap(),
            EngineMessage::Error("bad style".to_string())
        );
        assert!(EngineMessage::parse("{}").is_err());
        assert!(EngineMessage::parse("[1]").is_err());
        assert!(EngineMessage::parse("not json").is_err());
        assert!(EngineMessage::parse(r#"{"callback":"launchRockets"}"#).is_err());
    }

    #[test]
    fn test_connect_sends_create_and_reads_class() {
        let engine = engine_with_replies("");
        assert_eq!(engine.style_class(), StyleClass::Note);

        let sent = sent_lines(engine);
        assert_eq!(
            sent,
            vec![json!({"op": "create", "style": "<style/>", "locale": "de-DE"})]
        );
    }

    #[test]
    fn test_callbacks_are_answered_before_result() {
        let mut engine = engine_with_replies(concat!(
            "{\"callback\":\"retrieveItem\",\"id\":\"ITEM-1\"}\n",
            "{\"callback\":\"retrieveItem\",\"id\":\"MISSING\"}\n",
            "{\"callback\":\"retrieveLocale\",\"lang\":\"de-DE\"}\n",
            "{\"result\":[[0,\"(Known)\"]]}\n",
        ));

        let results = engine
            .append_citation_cluster(&FixedSystem, &json!({"properties": {"index": 0}}))
            .unwrap();
        assert_eq!(results, vec![ClusterResult::new(0, "(Known)")]);

        let sent = sent_lines(engine);
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[1]["op"], "appendCitationCluster");
        assert_eq!(sent[2], json!({"result": {"id": "ITEM-1", "title": "Known"}}));
        assert!(sent[3]["error"].as_str().unwrap().contains("MISSING"));
        assert_eq!(sent[4], json!({"result": "<locale xml:lang=\"de-DE\"/>"}));
    }

    #[test]
    fn test_engine_error_is_returned() {
        let mut engine = engine_with_replies("{\"error\":\"citation has no items\"}\n");
        let err = engine
            .append_citation_cluster(&FixedSystem, &json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::Engine(ref m) if m == "citation has no items"));
    }

    #[test]
    fn test_eof_is_protocol_error() {
        let mut engine = engine_with_replies("");
        let err = engine.update_items(&FixedSystem, &[1, 2]).unwrap_err();
        assert!(matches!(err, Error::EngineProtocol(_)));
    }

    #[test]
    fn test_false_bibliography_is_none() {
        let mut engine = engine_with_replies(concat!(
            "{\"result\":false}\n",
            "\n",
            "{\"result\":[{}, [\"<div>A</div>\"]]}\n",
        ));
        assert_eq!(engine.make_bibliography(&FixedSystem, None).unwrap(), None);
        assert_eq!(
            engine.make_bibliography(&FixedSystem, None).unwrap(),
            Some(json!([{}, ["<div>A</div>"]]))
        );
    }

    #[test]
    fn test_update_items_request_shape() {
        let mut engine = engine_with_replies("{\"result\":null}\n");
        engine.update_items(&FixedSystem, &[3, 1]).unwrap();
        let sent = sent_lines(engine);
        assert_eq!(sent[1], json!({"op": "updateItems", "ids": [3, 1]}));
    }

    #[test]
    fn test_undecodable_reply_refuses_later_requests() {
        let mut engine = engine_with_replies(concat!(
            "not json\n",
            "{\"result\":[[0,\"FIRST\"]]}\n",
            "{\"result\":[[0,\"SECOND\"]]}\n",
        ));
        let citation = json!({"properties": {"index": 0}});

        let first = engine.append_citation_cluster(&FixedSystem, &citation);
        assert!(matches!(first, Err(Error::EngineProtocol(_))));
        assert!(engine.is_out_of_sync());

        // the reply queued for the failed request must not be handed out
        let second = engine.append_citation_cluster(&FixedSystem, &citation);
        assert!(matches!(
            second,
            Err(Error::EngineProtocol(ref m)) if m.contains("out of sync")
        ));

        // nothing more was written after the failed request
        let sent = sent_lines(engine);
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn test_malformed_callback_refuses_later_requests() {
        let mut engine = engine_with_replies(concat!(
            "{\"callback\":\"retrieveItem\"}\n",
            "{\"result\":null}\n",
        ));
        assert!(matches!(
            engine.update_items(&FixedSystem, &[1]),
            Err(Error::EngineProtocol(_))
        ));
        assert!(matches!(
            engine.update_items(&FixedSystem, &[1]),
            Err(Error::EngineProtocol(_))
        ));
    }

    #[test]
    fn test_engine_error_keeps_channel_usable() {
        let mut engine = engine_with_replies(concat!(
            "{\"error\":\"unknown locale\"}\n",
            "{\"result\":null}\n",
        ));
        assert!(matches!(
            engine.update_items(&FixedSystem, &[1]),
            Err(Error::Engine(_))
        ));
        assert!(!engine.is_out_of_sync());
        engine.update_items(&FixedSystem, &[1]).unwrap();
    }

    #[test]
    fn test_create_without_style_class_fails() {
        let result = ChannelEngine::connect(
            Cursor::new(b"{\"result\":{}}\n".to_vec()),
            Vec::new(),
            &FixedSystem,
            "<style/>",
            "en-US",
        );
        assert!(matches!(result, Err(Error::EngineProtocol(_))));
    }
}
