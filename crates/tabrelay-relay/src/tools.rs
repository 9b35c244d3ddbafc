//! Tool catalog exposed to MCP clients and the tool-name to browser-action map.

use serde_json::{Map, Value, json};

use tabrelay_core::Message;

/// Tool whose results are saved as screenshot artifacts.
pub const SCREENSHOT_TOOL: &str = "browser_screenshot";
pub const SCREENSHOT_ACTION: &str = "screenshot";

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: &'static str,
    pub description: &'static str,
}

const fn param(name: &'static str, kind: &'static str, description: &'static str) -> Param {
    Param {
        name,
        kind,
        description,
    }
}

const TAB_ID: Param = param("tab_id", "integer", "Optional tab ID.");
const SELECTOR: Param = param("selector", "string", "CSS selector for the element.");
const XPATH: Param = param("xpath", "string", "XPath expression for the element.");
const TEXT: Param = param("text", "string", "Text content to match.");
const TIMEOUT: Param = param("timeout", "integer", "Maximum wait in milliseconds.");
const URL_PATTERN: Param = param("url_pattern", "string", "URL substring or pattern to match.");

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub action: &'static str,
    pub description: &'static str,
    pub params: &'static [Param],
    pub required: &'static [&'static str],
}

impl ToolSpec {
    /// JSON Schema for the tool's arguments.
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.to_string(),
                    json!({"type": p.kind, "description": p.description}),
                )
            })
            .collect();
        let mut schema = json!({"type": "object", "properties": properties});
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: SCREENSHOT_TOOL,
        action: SCREENSHOT_ACTION,
        description: "Take a screenshot of the current or a specific tab.",
        params: &[
            TAB_ID,
            param("full_page", "boolean", "Capture the full scrollable page."),
            param("save_to_file", "boolean", "Save the screenshot to a file (default true)."),
            param("filename", "string", "Optional filename for the saved screenshot."),
        ],
        required: &[],
    },
    ToolSpec {
        name: "browser_click",
        action: "click",
        description: "Click an element by selector, XPath, text or coordinates.",
        params: &[
            SELECTOR,
            XPATH,
            TEXT,
            param("x", "integer", "X coordinate."),
            param("y", "integer", "Y coordinate."),
            TAB_ID,
        ],
        required: &[],
    },
    ToolSpec {
        name: "browser_type",
        action: "type",
        description: "Type text into an input or editable element.",
        params: &[
            param("text", "string", "Text to type."),
            SELECTOR,
            param("clear", "boolean", "Clear the field first."),
            param("press_enter", "boolean", "Press Enter after typing."),
            TAB_ID,
        ],
        required: &["text"],
    },
    ToolSpec {
        name: "browser_scroll",
        action: "scroll",
        description: "Scroll the page or a specific element.",
        params: &[
            param("direction", "string", "up, down, left, right, top or bottom."),
            param("amount", "integer", "Pixels to scroll."),
            SELECTOR,
            TAB_ID,
        ],
        required: &[],
    },
    ToolSpec {
        name: "browser_navigate",
        action: "navigate",
        description: "Navigate to a URL.",
        params: &[
            param("url", "string", "URL to navigate to."),
            param("new_tab", "boolean", "Open in a new tab."),
            TAB_ID,
        ],
        required: &["url"],
    },
    ToolSpec {
        name: "browser_get_page_info",
        action: "getPageInfo",
        description: "Get URL, title, interactive elements and forms of the page.",
        params: &[TAB_ID],
        required: &[],
    },
    ToolSpec {
        name: "browser_get_elements",
        action: "getElements",
        description: "Describe elements matching a selector.",
        params: &[SELECTOR, param("limit", "integer", "Maximum elements returned."), TAB_ID],
        required: &["selector"],
    },
    ToolSpec {
        name: "browser_wait_for_element",
        action: "waitForElement",
        description: "Wait for an element to appear.",
        params: &[SELECTOR, TIMEOUT, TAB_ID],
        required: &["selector"],
    },
    ToolSpec {
        name: "browser_highlight",
        action: "highlight",
        description: "Highlight an element for visual debugging.",
        params: &[SELECTOR, param("duration", "integer", "Highlight duration in milliseconds."), TAB_ID],
        required: &["selector"],
    },
    ToolSpec {
        name: "browser_execute_script",
        action: "executeScript",
        description: "Execute JavaScript in the page context.",
        params: &[param("script", "string", "JavaScript source."), TAB_ID],
        required: &["script"],
    },
    ToolSpec {
        name: "browser_get_tabs",
        action: "getTabs",
        description: "List open tabs.",
        params: &[],
        required: &[],
    },
    ToolSpec {
        name: "browser_create_tab",
        action: "createTab",
        description: "Open a new tab.",
        params: &[
            param("url", "string", "URL to open."),
            param("active", "boolean", "Focus the new tab."),
        ],
        required: &[],
    },
    ToolSpec {
        name: "browser_close_tab",
        action: "closeTab",
        description: "Close a tab.",
        params: &[param("tab_id", "integer", "Tab to close.")],
        required: &["tab_id"],
    },
    ToolSpec {
        name: "browser_focus_tab",
        action: "focusTab",
        description: "Focus a tab.",
        params: &[param("tab_id", "integer", "Tab to focus.")],
        required: &["tab_id"],
    },
    ToolSpec {
        name: "browser_get_value",
        action: "getValue",
        description: "Read the value of an input element.",
        params: &[SELECTOR, TAB_ID],
        required: &["selector"],
    },
    ToolSpec {
        name: "browser_set_value",
        action: "setValue",
        description: "Set an input value directly, without simulated typing.",
        params: &[SELECTOR, param("value", "string", "Value to set."), TAB_ID],
        required: &["selector", "value"],
    },
    ToolSpec {
        name: "browser_select_option",
        action: "selectOption",
        description: "Select an option in a dropdown.",
        params: &[
            SELECTOR,
            param("value", "string", "Option value."),
            param("text", "string", "Option text."),
            param("index", "integer", "Option index."),
            TAB_ID,
        ],
        required: &["selector"],
    },
    ToolSpec {
        name: "browser_hover",
        action: "hover",
        description: "Hover over an element.",
        params: &[SELECTOR, TAB_ID],
        required: &["selector"],
    },
    ToolSpec {
        name: "browser_refresh",
        action: "refresh",
        description: "Reload the current or a specific tab.",
        params: &[TAB_ID],
        required: &[],
    },
    ToolSpec {
        name: "browser_hard_refresh",
        action: "hardRefresh",
        description: "Reload bypassing caches.",
        params: &[TAB_ID],
        required: &[],
    },
    ToolSpec {
        name: "browser_reload_all",
        action: "reloadAll",
        description: "Reload all tabs, optionally filtered by URL.",
        params: &[URL_PATTERN, param("bypass_cache", "boolean", "Bypass caches.")],
        required: &[],
    },
    ToolSpec {
        name: "browser_reload_by_url",
        action: "reloadByUrl",
        description: "Reload tabs whose URL matches a pattern.",
        params: &[URL_PATTERN, param("bypass_cache", "boolean", "Bypass caches.")],
        required: &["url_pattern"],
    },
    ToolSpec {
        name: "browser_wait_for_change",
        action: "waitForChange",
        description: "Wait for DOM changes.",
        params: &[SELECTOR, TIMEOUT, TAB_ID],
        required: &[],
    },
    ToolSpec {
        name: "browser_wait_for_network_idle",
        action: "waitForNetworkIdle",
        description: "Wait for fetch/XHR traffic to settle.",
        params: &[TIMEOUT, param("idle_time", "integer", "Quiet period in milliseconds."), TAB_ID],
        required: &[],
    },
    ToolSpec {
        name: "browser_observe_element",
        action: "observeElement",
        description: "Start recording changes to an element.",
        params: &[SELECTOR, TAB_ID],
        required: &["selector"],
    },
    ToolSpec {
        name: "browser_stop_observing",
        action: "stopObserving",
        description: "Stop an observation and return the recorded changes.",
        params: &[param("observer_id", "string", "Observation to stop."), TAB_ID],
        required: &["observer_id"],
    },
    ToolSpec {
        name: "browser_scroll_and_capture",
        action: "scrollAndCapture",
        description: "Scroll the whole page collecting visible elements per viewport.",
        params: &[param("step", "integer", "Scroll step in pixels."), TAB_ID],
        required: &[],
    },
    ToolSpec {
        name: "browser_click_and_wait",
        action: "clickAndWait",
        description: "Click an element and wait for the resulting DOM change.",
        params: &[
            SELECTOR,
            XPATH,
            TEXT,
            param("wait_timeout", "integer", "Maximum wait in milliseconds."),
            param("wait_for_selector", "string", "Element expected after the click."),
            TAB_ID,
        ],
        required: &[],
    },
];

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// `{tools: [...]}` as served by `GET /mcp/tools`.
pub fn catalog() -> Value {
    json!({"tools": TOOLS.iter().map(ToolSpec::to_json).collect::<Vec<_>>()})
}

/// Build the browser command for a tool call.
///
/// `tab_id` is hoisted out of the arguments into `tabId`; the remaining
/// arguments become `data`. Returns `None` for unknown tools.
pub fn build_command(name: &str, arguments: &Value) -> Option<Message> {
    let spec = find(name)?;
    let mut data = arguments.as_object().cloned().unwrap_or_default();
    let tab_id = data.remove("tab_id").filter(|v| !v.is_null());

    let mut command = Message::with_action(spec.action);
    if let Some(tab_id) = tab_id {
        command.insert("tabId", tab_id);
    }
    command.insert("data", Value::Object(data));
    Some(command)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_has_unique_names_and_actions() {
        assert_eq!(TOOLS.len(), 28);
        let names: HashSet<_> = TOOLS.iter().map(|t| t.name).collect();
        let actions: HashSet<_> = TOOLS.iter().map(|t| t.action).collect();
        assert_eq!(names.len(), TOOLS.len());
        assert_eq!(actions.len(), TOOLS.len());
    }

    #[test]
    fn required_params_are_declared() {
        for tool in TOOLS {
            for req in tool.required {
                assert!(
                    tool.params.iter().any(|p| p.name == *req),
                    "{} requires undeclared {req}",
                    tool.name
                );
            }
        }
    }

    #[test]
    fn tab_id_is_hoisted() {
        let cmd = build_command(
            "browser_navigate",
            &json!({"url": "https://example.com", "tab_id": 3}),
        )
        .unwrap();
        assert_eq!(cmd.action(), Some("navigate"));
        assert_eq!(cmd.get("tabId"), Some(&json!(3)));
        assert_eq!(cmd.get("data"), Some(&json!({"url": "https://example.com"})));
    }

    #[test]
    fn missing_arguments_become_empty_data() {
        let cmd = build_command("browser_get_tabs", &Value::Null).unwrap();
        assert_eq!(cmd.get("data"), Some(&json!({})));
        assert!(!cmd.contains_key("tabId"));
    }

    #[test]
    fn unknown_tool_has_no_command() {
        assert!(build_command("browser_teleport", &json!({})).is_none());
    }

    #[test]
    fn schema_lists_required() {
        let schema = find("browser_set_value").unwrap().input_schema();
        assert_eq!(schema["required"], json!(["selector", "value"]));
        assert_eq!(schema["properties"]["value"]["type"], "string");
    }
}
