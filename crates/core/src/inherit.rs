//! Inheritance resolver: the single merge point between a parent agent's
//! config and a sub-agent's overlay. No call site reads a sub-agent's raw
//! config in isolation; every turn goes through `resolve_effective`.

use std::collections::BTreeSet;

use crate::domain::agent::{AgentConfig, ConfigKey, SubAgentConfig};
use crate::errors::DomainError;

/// Merge `parent` and `sub` under the sub-agent's inheritance set.
///
/// Per key: inherited keys take the parent value (the sub-agent's value, if
/// any, is ignored), non-inherited keys take the sub-agent's value when set
/// and fall back to the parent otherwise. Set- and sequence-valued keys
/// (`tools`, `topics`, `guardrails.keywords`) union with the parent when
/// inherited instead of overwriting, so a sub-agent cannot shed the parent's
/// safety keywords by inheriting them.
pub fn resolve_effective(
    parent: &AgentConfig,
    sub: &SubAgentConfig,
    inherit: &BTreeSet<ConfigKey>,
) -> Result<AgentConfig, DomainError> {
    let mut effective = parent.clone();

    if !inherit.contains(&ConfigKey::Model) {
        if let Some(model) = &sub.model {
            effective.model = model.clone();
        }
    }
    if !inherit.contains(&ConfigKey::Provider) {
        if let Some(provider) = &sub.provider {
            effective.provider = provider.clone();
        }
    }
    if !inherit.contains(&ConfigKey::SystemPrompt) {
        if let Some(system_prompt) = &sub.system_prompt {
            effective.system_prompt = system_prompt.clone();
        }
    }
    if !inherit.contains(&ConfigKey::Temperature) {
        if let Some(temperature) = sub.temperature {
            effective.temperature = temperature;
        }
    }
    if !inherit.contains(&ConfigKey::MaxTokens) {
        if let Some(max_tokens) = sub.max_tokens {
            effective.max_tokens = max_tokens;
        }
    }
    if !inherit.contains(&ConfigKey::Channel) {
        if let Some(channel) = sub.channel {
            effective.channel = channel;
        }
    }

    if inherit.contains(&ConfigKey::Tools) {
        if let Some(tools) = &sub.tools {
            effective.tools.extend(tools.iter().cloned());
        }
    } else if let Some(tools) = &sub.tools {
        effective.tools = tools.clone();
    }

    if inherit.contains(&ConfigKey::Topics) {
        if let Some(topics) = &sub.topics {
            for topic in topics {
                if !effective.topics.contains(topic) {
                    effective.topics.push(topic.clone());
                }
            }
        }
    } else if let Some(topics) = &sub.topics {
        effective.topics = topics.clone();
    }

    if !inherit.contains(&ConfigKey::Guardrails) {
        if let Some(guardrails) = &sub.guardrails {
            effective.guardrails = guardrails.clone();
        }
    }
    if inherit.contains(&ConfigKey::GuardrailKeywords) {
        effective.guardrails.keywords.extend(parent.guardrails.keywords.iter().cloned());
        if let Some(guardrails) = &sub.guardrails {
            effective.guardrails.keywords.extend(guardrails.keywords.iter().cloned());
        }
    }

    validate(&effective)?;
    Ok(effective)
}

fn validate(config: &AgentConfig) -> Result<(), DomainError> {
    if !(0.0..=1.0).contains(&config.temperature) {
        return Err(DomainError::ConfigInvalid {
            field: "temperature",
            value: config.temperature.to_string(),
            constraint: "must be within 0..=1",
        });
    }
    if config.max_tokens < 1 {
        return Err(DomainError::ConfigInvalid {
            field: "max_tokens",
            value: config.max_tokens.to_string(),
            constraint: "must be at least 1",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::domain::agent::{AgentConfig, ConfigKey, SubAgentConfig};
    use crate::errors::DomainError;
    use crate::guardrails::GuardrailPolicy;

    use super::resolve_effective;

    fn parent() -> AgentConfig {
        AgentConfig {
            model: "gpt-4o".to_string(),
            provider: "openai".to_string(),
            system_prompt: "You are the main agent.".to_string(),
            temperature: 0.4,
            max_tokens: 512,
            tools: BTreeSet::from(["crm_lookup".to_string()]),
            topics: vec!["general".to_string()],
            guardrails: GuardrailPolicy {
                enabled: true,
                keywords: BTreeSet::from(["secret".to_string()]),
                ..GuardrailPolicy::default()
            },
            ..AgentConfig::default()
        }
    }

    #[test]
    fn empty_overlay_is_identity() {
        let parent = parent();
        let effective = resolve_effective(&parent, &SubAgentConfig::default(), &BTreeSet::new())
            .expect("resolve with empty overlay");
        assert_eq!(effective, parent);
    }

    #[test]
    fn unset_keys_fall_back_to_parent_and_set_keys_override() {
        let sub = SubAgentConfig {
            model: Some("gpt-4o-mini".to_string()),
            temperature: Some(0.1),
            ..SubAgentConfig::default()
        };

        let effective =
            resolve_effective(&parent(), &sub, &BTreeSet::new()).expect("resolve overrides");
        assert_eq!(effective.model, "gpt-4o-mini");
        assert_eq!(effective.temperature, 0.1);
        assert_eq!(effective.provider, "openai");
        assert_eq!(effective.max_tokens, 512);
    }

    #[test]
    fn inherited_scalar_ignores_sub_agent_value() {
        let sub = SubAgentConfig { model: Some("claude-3".to_string()), ..SubAgentConfig::default() };
        let inherit = BTreeSet::from([ConfigKey::Model]);

        let effective = resolve_effective(&parent(), &sub, &inherit).expect("resolve inherited");
        assert_eq!(effective.model, "gpt-4o");
    }

    #[test]
    fn inherited_tools_union_instead_of_overwrite() {
        let sub = SubAgentConfig {
            tools: Some(BTreeSet::from(["ticket_create".to_string()])),
            ..SubAgentConfig::default()
        };
        let inherit = BTreeSet::from([ConfigKey::Tools]);

        let effective = resolve_effective(&parent(), &sub, &inherit).expect("resolve tools");
        assert_eq!(
            effective.tools,
            BTreeSet::from(["crm_lookup".to_string(), "ticket_create".to_string()])
        );
    }

    #[test]
    fn inherited_guardrail_keywords_union() {
        let sub = SubAgentConfig {
            guardrails: Some(GuardrailPolicy {
                enabled: true,
                keywords: BTreeSet::from(["private".to_string()]),
                ..GuardrailPolicy::default()
            }),
            ..SubAgentConfig::default()
        };
        let inherit = BTreeSet::from([ConfigKey::GuardrailKeywords]);

        let effective = resolve_effective(&parent(), &sub, &inherit).expect("resolve keywords");
        assert_eq!(
            effective.guardrails.keywords,
            BTreeSet::from(["private".to_string(), "secret".to_string()])
        );
    }

    #[test]
    fn adding_inherited_keys_never_narrows_set_fields() {
        let sub = SubAgentConfig {
            tools: Some(BTreeSet::from(["ticket_create".to_string()])),
            topics: Some(vec!["billing".to_string()]),
            ..SubAgentConfig::default()
        };

        let without = resolve_effective(&parent(), &sub, &BTreeSet::new()).expect("baseline");
        let with = resolve_effective(
            &parent(),
            &sub,
            &BTreeSet::from([ConfigKey::Tools, ConfigKey::Topics]),
        )
        .expect("inherited");

        assert!(with.tools.is_superset(&without.tools));
        for topic in &without.topics {
            assert!(with.topics.contains(topic));
        }
    }

    #[test]
    fn out_of_range_temperature_fails_resolution() {
        let sub = SubAgentConfig { temperature: Some(1.5), ..SubAgentConfig::default() };
        let error = resolve_effective(&parent(), &sub, &BTreeSet::new())
            .expect_err("temperature out of range");
        assert!(matches!(error, DomainError::ConfigInvalid { field: "temperature", .. }));
    }

    #[test]
    fn zero_max_tokens_fails_resolution() {
        let sub = SubAgentConfig { max_tokens: Some(0), ..SubAgentConfig::default() };
        let error =
            resolve_effective(&parent(), &sub, &BTreeSet::new()).expect_err("zero max_tokens");
        assert!(matches!(error, DomainError::ConfigInvalid { field: "max_tokens", .. }));
    }
}
