//! Step actions, targets and element locators.
//!
//! Everything here is validated once, at load time. The executor
//! only ever sees the typed [`StepAction`].

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Closed set of operations a step may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    InputText,
    Click,
    DoubleClick,
    RightClick,
    Hover,
    ClearText,
    SelectDropdown,
    AssertElementText,
    AssertElementCount,
    AssertElementVisible,
    AssertElementNotVisible,
    AssertElementAttribute,
    AssertUrlContains,
    AssertTitleContains,
    WaitForElement,
    WaitForText,
    Refresh,
    Back,
    Forward,
    Wait,
}

impl ActionKind {
    pub const ALL: [ActionKind; 21] = [
        ActionKind::Navigate,
        ActionKind::InputText,
        ActionKind::Click,
        ActionKind::DoubleClick,
        ActionKind::RightClick,
        ActionKind::Hover,
        ActionKind::ClearText,
        ActionKind::SelectDropdown,
        ActionKind::AssertElementText,
        ActionKind::AssertElementCount,
        ActionKind::AssertElementVisible,
        ActionKind::AssertElementNotVisible,
        ActionKind::AssertElementAttribute,
        ActionKind::AssertUrlContains,
        ActionKind::AssertTitleContains,
        ActionKind::WaitForElement,
        ActionKind::WaitForText,
        ActionKind::Refresh,
        ActionKind::Back,
        ActionKind::Forward,
        ActionKind::Wait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::InputText => "input_text",
            ActionKind::Click => "click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::RightClick => "right_click",
            ActionKind::Hover => "hover",
            ActionKind::ClearText => "clear_text",
            ActionKind::SelectDropdown => "select_dropdown",
            ActionKind::AssertElementText => "assert_element_text",
            ActionKind::AssertElementCount => "assert_element_count",
            ActionKind::AssertElementVisible => "assert_element_visible",
            ActionKind::AssertElementNotVisible => "assert_element_not_visible",
            ActionKind::AssertElementAttribute => "assert_element_attribute",
            ActionKind::AssertUrlContains => "assert_url_contains",
            ActionKind::AssertTitleContains => "assert_title_contains",
            ActionKind::WaitForElement => "wait_for_element",
            ActionKind::WaitForText => "wait_for_text",
            ActionKind::Refresh => "refresh",
            ActionKind::Back => "back",
            ActionKind::Forward => "forward",
            ActionKind::Wait => "wait",
        }
    }

    /// `true` when the action operates on an element rather than on
    /// the page as a whole.
    pub fn needs_element(&self) -> bool {
        matches!(
            self,
            ActionKind::InputText
                | ActionKind::Click
                | ActionKind::DoubleClick
                | ActionKind::RightClick
                | ActionKind::Hover
                | ActionKind::ClearText
                | ActionKind::SelectDropdown
                | ActionKind::AssertElementText
                | ActionKind::AssertElementCount
                | ActionKind::AssertElementVisible
                | ActionKind::AssertElementNotVisible
                | ActionKind::AssertElementAttribute
                | ActionKind::WaitForElement
                | ActionKind::WaitForText
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ActionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                EngineError::config(format!("unsupported action '{s}'"))
            })
    }
}

/// How a locator value is matched against the DOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    Id,
    Class,
    Xpath,
    Css,
    Name,
    Tag,
    LinkText,
    PartialLinkText,
}

impl LocatorStrategy {
    fn parse(prefix: &str) -> Option<Self> {
        let strategy = match prefix {
            "id" => LocatorStrategy::Id,
            "class" => LocatorStrategy::Class,
            "xpath" => LocatorStrategy::Xpath,
            "css" => LocatorStrategy::Css,
            "name" => LocatorStrategy::Name,
            "tag" => LocatorStrategy::Tag,
            "link_text" => LocatorStrategy::LinkText,
            "partial_link_text" => LocatorStrategy::PartialLinkText,
            _ => return None,
        };
        Some(strategy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorStrategy::Id => "id",
            LocatorStrategy::Class => "class",
            LocatorStrategy::Xpath => "xpath",
            LocatorStrategy::Css => "css",
            LocatorStrategy::Name => "name",
            LocatorStrategy::Tag => "tag",
            LocatorStrategy::LinkText => "link_text",
            LocatorStrategy::PartialLinkText => "partial_link_text",
        }
    }
}

/// A parsed `strategy:value` element descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.strategy.as_str(), self.value)
    }
}

impl FromStr for Locator {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| EngineError::Locator {
            target: s.to_string(),
            reason: reason.to_string(),
        };

        let (prefix, value) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected 'strategy:value'"))?;
        let strategy = LocatorStrategy::parse(prefix.trim())
            .ok_or_else(|| invalid("unknown locator strategy"))?;
        if value.trim().is_empty() {
            return Err(invalid("locator value is empty"));
        }

        Ok(Locator::new(strategy, value))
    }
}

/// What a step points at: the page itself (the `url` sentinel) or
/// a DOM element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Page,
    Element(Locator),
}

impl Target {
    pub const PAGE_SENTINEL: &'static str = "url";
}

impl FromStr for Target {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == Target::PAGE_SENTINEL {
            return Ok(Target::Page);
        }
        trimmed.parse().map(Target::Element)
    }
}

/// A fully validated step payload, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Navigate { url: String },
    InputText { locator: Locator, text: String },
    Click { locator: Locator },
    DoubleClick { locator: Locator },
    RightClick { locator: Locator },
    Hover { locator: Locator },
    ClearText { locator: Locator },
    /// Pick the option whose value, or failing that visible text,
    /// equals `option`.
    SelectDropdown { locator: Locator, option: String },
    AssertElementText { locator: Locator, expected: String },
    AssertElementCount { locator: Locator, expected: usize },
    AssertElementVisible { locator: Locator },
    AssertElementNotVisible { locator: Locator },
    AssertElementAttribute {
        locator: Locator,
        attribute: String,
        expected: String,
    },
    AssertUrlContains { expected: String },
    AssertTitleContains { expected: String },
    WaitForElement { locator: Locator },
    WaitForText { locator: Locator, text: String },
    Refresh,
    Back,
    Forward,
    Wait { duration: Duration },
}

impl StepAction {
    /// Build the typed action from a kind, a parsed target and the
    /// resolved value string. `url` is the already-absolutized
    /// destination for `navigate`.
    pub fn build(
        kind: ActionKind,
        target: Target,
        raw_target: &str,
        value: &str,
        url: Option<String>,
    ) -> Result<Self, EngineError> {
        let locator = match (kind.needs_element(), target) {
            (true, Target::Element(locator)) => Some(locator),
            (true, Target::Page) => {
                return Err(EngineError::Locator {
                    target: raw_target.to_string(),
                    reason: format!("action '{kind}' needs an element locator"),
                })
            }
            (false, Target::Page) => None,
            (false, Target::Element(_)) => {
                return Err(EngineError::Locator {
                    target: raw_target.to_string(),
                    reason: format!(
                        "action '{kind}' expects the '{}' target",
                        Target::PAGE_SENTINEL
                    ),
                })
            }
        };

        let action = match (kind, locator) {
            (ActionKind::Navigate, _) => StepAction::Navigate {
                url: url.unwrap_or_else(|| value.to_string()),
            },
            (ActionKind::InputText, Some(locator)) => StepAction::InputText {
                locator,
                text: value.to_string(),
            },
            (ActionKind::Click, Some(locator)) => StepAction::Click { locator },
            (ActionKind::DoubleClick, Some(locator)) => {
                StepAction::DoubleClick { locator }
            }
            (ActionKind::RightClick, Some(locator)) => {
                StepAction::RightClick { locator }
            }
            (ActionKind::Hover, Some(locator)) => StepAction::Hover { locator },
            (ActionKind::ClearText, Some(locator)) => {
                StepAction::ClearText { locator }
            }
            (ActionKind::SelectDropdown, Some(locator)) => {
                if value.is_empty() {
                    return Err(EngineError::config(
                        "select_dropdown needs the option value or text",
                    ));
                }
                StepAction::SelectDropdown {
                    locator,
                    option: value.to_string(),
                }
            }
            (ActionKind::AssertElementText, Some(locator)) => {
                StepAction::AssertElementText {
                    locator,
                    expected: value.to_string(),
                }
            }
            (ActionKind::AssertElementCount, Some(locator)) => {
                let expected = value.trim().parse::<usize>().map_err(|_| {
                    EngineError::config(format!(
                        "assert_element_count expects a non-negative \
                         integer, got '{value}'"
                    ))
                })?;
                StepAction::AssertElementCount { locator, expected }
            }
            (ActionKind::AssertElementVisible, Some(locator)) => {
                StepAction::AssertElementVisible { locator }
            }
            (ActionKind::AssertElementNotVisible, Some(locator)) => {
                StepAction::AssertElementNotVisible { locator }
            }
            (ActionKind::AssertElementAttribute, Some(locator)) => {
                let (attribute, expected) = parse_attribute_check(value)?;
                StepAction::AssertElementAttribute {
                    locator,
                    attribute,
                    expected,
                }
            }
            (ActionKind::AssertUrlContains, _) => {
                StepAction::AssertUrlContains {
                    expected: value.to_string(),
                }
            }
            (ActionKind::AssertTitleContains, _) => {
                StepAction::AssertTitleContains {
                    expected: value.to_string(),
                }
            }
            (ActionKind::WaitForElement, Some(locator)) => {
                StepAction::WaitForElement { locator }
            }
            (ActionKind::WaitForText, Some(locator)) => StepAction::WaitForText {
                locator,
                text: value.to_string(),
            },
            (ActionKind::Refresh, _) => StepAction::Refresh,
            (ActionKind::Back, _) => StepAction::Back,
            (ActionKind::Forward, _) => StepAction::Forward,
            (ActionKind::Wait, _) => {
                let seconds = if value.trim().is_empty() {
                    1.0
                } else {
                    value.trim().parse::<f64>().map_err(|_| {
                        EngineError::config(format!(
                            "wait expects a number of seconds, got '{value}'"
                        ))
                    })?
                };
                StepAction::Wait {
                    duration: seconds_to_duration(seconds, "wait")?,
                }
            }
            (kind, None) => {
                return Err(EngineError::config(format!(
                    "action '{kind}' is missing its locator"
                )))
            }
        };

        Ok(action)
    }
}

/// Split an `attribute=expected` check. Only the first `=` splits,
/// so expected values may contain their own.
fn parse_attribute_check(value: &str) -> Result<(String, String), EngineError> {
    let invalid = || {
        EngineError::config(format!(
            "assert_element_attribute expects 'attribute=expected', got '{value}'"
        ))
    };
    let (attribute, expected) = value.split_once('=').ok_or_else(invalid)?;
    let attribute = attribute.trim();
    if attribute.is_empty() {
        return Err(invalid());
    }
    Ok((attribute.to_string(), expected.to_string()))
}

/// Convert a non-negative number of seconds into a [`Duration`].
/// Values too large to represent are rejected.
pub fn seconds_to_duration(
    seconds: f64,
    field: &str,
) -> Result<Duration, EngineError> {
    if seconds.is_nan() || seconds < 0.0 {
        return Err(EngineError::config(format!(
            "{field} must be a non-negative number of seconds, got {seconds}"
        )));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        EngineError::config(format!("{field} of {seconds}s is out of range: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_kinds() {
        assert_eq!(
            "navigate".parse::<ActionKind>().unwrap(),
            ActionKind::Navigate
        );
        assert_eq!(
            "Assert_Element_Count".parse::<ActionKind>().unwrap(),
            ActionKind::AssertElementCount
        );
        let err = "execute_script".parse::<ActionKind>().unwrap_err();
        assert!(err.to_string().contains("execute_script"));
    }

    #[test]
    fn test_parse_locators() {
        let locator: Locator = "id:user-name".parse().unwrap();
        assert_eq!(locator.strategy, LocatorStrategy::Id);
        assert_eq!(locator.value, "user-name");

        // Only the first colon splits; xpath values keep theirs.
        let locator: Locator =
            "xpath://div[@data-test='a:b']".parse().unwrap();
        assert_eq!(locator.strategy, LocatorStrategy::Xpath);
        assert_eq!(locator.value, "//div[@data-test='a:b']");
        assert_eq!(locator.to_string(), "xpath://div[@data-test='a:b']");
    }

    #[test]
    fn test_malformed_locators_rejected() {
        for bad in ["user-name", "unknown:foo", "id:", "id:   "] {
            let err = bad.parse::<Locator>().unwrap_err();
            assert!(
                matches!(err, EngineError::Locator { .. }),
                "{bad} should be a locator error"
            );
        }
    }

    #[test]
    fn test_target_sentinel() {
        assert_eq!("url".parse::<Target>().unwrap(), Target::Page);
        assert_eq!("".parse::<Target>().unwrap(), Target::Page);
        assert!(matches!(
            "class:title".parse::<Target>().unwrap(),
            Target::Element(_)
        ));
    }

    #[test]
    fn test_build_rejects_mismatched_target() {
        let err = StepAction::build(
            ActionKind::Click,
            Target::Page,
            "url",
            "",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Locator { .. }));

        let locator = Target::Element("id:x".parse().unwrap());
        let err = StepAction::build(
            ActionKind::AssertUrlContains,
            locator,
            "id:x",
            "/inventory",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Locator { .. }));
    }

    #[test]
    fn test_build_parses_count() {
        let target = Target::Element("class:inventory_item".parse().unwrap());
        let action = StepAction::build(
            ActionKind::AssertElementCount,
            target.clone(),
            "class:inventory_item",
            " 6 ",
            None,
        )
        .unwrap();
        assert!(matches!(
            action,
            StepAction::AssertElementCount { expected: 6, .. }
        ));

        let err = StepAction::build(
            ActionKind::AssertElementCount,
            target,
            "class:inventory_item",
            "six",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(seconds_to_duration(-1.0, "wait_time").is_err());
        assert!(seconds_to_duration(f64::NAN, "wait_time").is_err());
        assert_eq!(
            seconds_to_duration(0.5, "wait_time").unwrap(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_oversized_duration_rejected() {
        for seconds in [1e20, f64::INFINITY] {
            let err = seconds_to_duration(seconds, "wait_time").unwrap_err();
            assert!(matches!(err, EngineError::Config(_)), "{seconds}");
            assert!(err.to_string().contains("wait_time"));
        }
    }

    #[test]
    fn test_parse_pointer_and_form_actions() {
        for (name, kind) in [
            ("hover", ActionKind::Hover),
            ("double_click", ActionKind::DoubleClick),
            ("right_click", ActionKind::RightClick),
            ("select_dropdown", ActionKind::SelectDropdown),
            ("wait_for_text", ActionKind::WaitForText),
            ("assert_element_attribute", ActionKind::AssertElementAttribute),
            ("assert_element_not_visible", ActionKind::AssertElementNotVisible),
        ] {
            assert_eq!(name.parse::<ActionKind>().unwrap(), kind);
            assert!(kind.needs_element(), "{name}");
        }
    }

    #[test]
    fn test_build_attribute_check() {
        let target = Target::Element("id:email".parse().unwrap());
        let action = StepAction::build(
            ActionKind::AssertElementAttribute,
            target.clone(),
            "id:email",
            "placeholder=name@example.com?a=b",
            None,
        )
        .unwrap();
        assert_eq!(
            action,
            StepAction::AssertElementAttribute {
                locator: "id:email".parse().unwrap(),
                attribute: "placeholder".into(),
                expected: "name@example.com?a=b".into(),
            }
        );

        for bad in ["placeholder", "=value"] {
            let err = StepAction::build(
                ActionKind::AssertElementAttribute,
                target.clone(),
                "id:email",
                bad,
                None,
            )
            .unwrap_err();
            assert!(matches!(err, EngineError::Config(_)), "{bad}");
        }
    }

    #[test]
    fn test_select_dropdown_needs_option() {
        let target = Target::Element("class:product_sort_container".parse().unwrap());
        let err = StepAction::build(
            ActionKind::SelectDropdown,
            target,
            "class:product_sort_container",
            "",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
