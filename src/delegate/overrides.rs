// Override resolver - applies JSON blocks and named inputs to matched calls

use crate::delegate::context::{MatchedAgent, MatchedTool};
use crate::delegate::hints::Hints;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One structured override block found in the message
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteCallArgs {
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default, alias = "data")]
    pub args: Option<Value>,
    #[serde(default)]
    pub input: Option<String>,
    /// Extra headers to send with the call
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Applies overrides on the invocation's private call clones
pub struct OverrideResolver;

impl OverrideResolver {
    pub fn apply(tools: &mut [MatchedTool], agents: &mut [MatchedAgent], hints: &Hints) {
        for block in &hints.json_blocks {
            let args: RemoteCallArgs = match serde_json::from_value(Value::Object(block.clone())) {
                Ok(args) => args,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed override block");
                    continue;
                }
            };
            Self::apply_block(tools, agents, args);
        }

        for (name, text) in &hints.inputs {
            if let Some(tool) = tools.iter_mut().find(|t| t.answers_to(name)) {
                debug!(tool = %tool.name(), "named input overrides tool arguments");
                set_tool_input(tool, text);
            }
            if let Some(agent) = agents.iter_mut().find(|a| a.answers_to(name)) {
                debug!(agent = %agent.name(), "named input overrides forwarded message");
                agent.message = Some(text.clone());
            }
        }
    }

    fn apply_block(tools: &mut [MatchedTool], agents: &mut [MatchedAgent], args: RemoteCallArgs) {
        if let Some(name) = args.tool.as_deref() {
            match tools.iter_mut().find(|t| t.answers_to(name)) {
                Some(tool) => {
                    debug!(tool = %tool.name(), "applying override block");
                    if let Some(url) = &args.url {
                        tool.call.url = url.clone();
                    }
                    if args.authority.is_some() {
                        tool.call.authority = args.authority.clone();
                    }
                    match &args.args {
                        Some(Value::Object(overlay)) => merge_args(&mut tool.call.args, overlay),
                        Some(other) => {
                            tool.call.args.insert("input".to_string(), other.clone());
                        }
                        None => {}
                    }
                    if let Some(input) = &args.input {
                        set_tool_input(tool, input);
                    }
                    tool.call.headers.add.extend(args.headers.clone());
                }
                None => debug!(tool = name, "override block names a tool that was not matched"),
            }
        }

        if let Some(name) = args.agent.as_deref() {
            match agents.iter_mut().find(|a| a.answers_to(name)) {
                Some(agent) => {
                    debug!(agent = %agent.name(), "applying override block");
                    if let Some(url) = &args.url {
                        agent.call.url = url.clone();
                    }
                    if args.authority.is_some() {
                        agent.call.authority = args.authority.clone();
                    }
                    if let Some(data) = &args.args {
                        agent.data = Some(data.clone());
                    }
                    if let Some(input) = &args.input {
                        agent.message = Some(input.clone());
                    }
                    agent.call.headers.add.extend(args.headers);
                }
                None => debug!(agent = name, "override block names an agent that was not matched"),
            }
        }
    }
}

/// Free text reaches a tool as its `input` argument
fn set_tool_input(tool: &mut MatchedTool, text: &str) {
    tool.call
        .args
        .insert("input".to_string(), Value::String(text.to_string()));
}

fn merge_args(args: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (k, v) in overlay {
        args.insert(k.clone(), v.clone());
    }
}
