//! Context assembly for one agent turn.
//!
//! The system prompt is a list of ordered blocks so the stable prefix can
//! carry a cache marker; the message tail starts just after the observed
//! cursor with a floor of `keep_last_messages`.

use bs_domain::chat::{ChatMessage, MessageContent, Role, SystemBlock};
use bs_domain::config::{Config, MemoryConfig};
use bs_domain::Result;
use bs_store::Store;

use crate::memory::MemoryHit;

/// Identity prefix required when the Anthropic credential is an OAuth token.
const CLAUDE_CODE_IDENTITY: &str =
    "You are Claude Code, Anthropic's official CLI for Claude.";

/// Everything the agent loop needs for its first model call.
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub system: Vec<SystemBlock>,
    pub messages: Vec<ChatMessage>,
    pub should_observe: bool,
    pub should_reflect: bool,
    /// Lock version of the memory state the flags were computed from; the
    /// observer pass uses it for its CAS.
    pub memory_lock_version: i64,
}

pub struct ContextBuilder<'a> {
    store: &'a Store,
    config: &'a MemoryConfig,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(store: &'a Store, config: &'a MemoryConfig) -> Self {
        Self { store, config }
    }

    pub fn build(
        &self,
        conversation_id: &str,
        system_prompt: &str,
        memories: &[MemoryHit],
        use_oauth: bool,
        channel: Option<&str>,
    ) -> Result<BuiltContext> {
        let mut system = Vec::new();

        if use_oauth {
            system.push(SystemBlock::new(CLAUDE_CODE_IDENTITY));
        }
        system.push(SystemBlock::new(system_prompt));

        let log = self.store.latest_observation_log(conversation_id)?;
        match &log {
            Some(log) => {
                system.push(SystemBlock::cached(format!(
                    "Conversation Context (Observations)\n\n{}",
                    log.text
                )));
            }
            None => {
                // No observation block: the cache marker goes on the last
                // stable block instead.
                if let Some(last) = system.last_mut() {
                    last.cache = true;
                }
            }
        }

        if !memories.is_empty() {
            let lines: Vec<String> = memories
                .iter()
                .map(|m| format!("- [{}] {} (id: {})", m.category, m.content, m.id))
                .collect();
            system.push(SystemBlock::new(format!(
                "Relevant long-term memories:\n{}",
                lines.join("\n")
            )));
        }

        if let Some(channel) = channel {
            if channel != "web" {
                system.push(SystemBlock::new(format!(
                    "You are replying on the {channel} channel; keep responses concise."
                )));
            }
        }

        let state = self
            .store
            .memory_state(conversation_id)?
            .ok_or_else(|| {
                bs_domain::Error::NotFound(format!("memory state for {conversation_id}"))
            })?;

        // Tail: everything after the observed cursor, but never fewer than
        // the configured floor.
        let mut tail = self
            .store
            .messages_after(conversation_id, state.observed_cursor_message_id)?;
        if tail.len() < self.config.keep_last_messages {
            tail = self
                .store
                .last_messages(conversation_id, self.config.keep_last_messages)?;
        }

        let messages = tail
            .iter()
            .map(|m| ChatMessage {
                role: match m.role.as_str() {
                    "assistant" => Role::Assistant,
                    "tool" => Role::Tool,
                    _ => Role::User,
                },
                content: MessageContent::Text(m.content.clone()),
            })
            .collect();

        Ok(BuiltContext {
            system,
            messages,
            should_observe: state.unobserved_token_count
                >= self.config.observe_threshold_tokens as i64,
            should_reflect: state.observation_token_count
                >= self.config.reflect_threshold_tokens as i64,
            memory_lock_version: state.lock_version,
        })
    }
}

/// The brain's base system prompt.
pub fn base_system_prompt(config: &Config) -> String {
    format!(
        "You are {}, a personal AI assistant. You can call tools to run \
         commands, fetch URLs, and dispatch long-running jobs to workers. \
         Prefer acting over describing; report what you actually did.",
        config.server.agent_name
    )
}

/// Base prompt plus the instruction text of enabled tier-0 skills (pure
/// instructions, no tool calls).
pub fn system_prompt_with_instructions(config: &Config, store: &Store) -> Result<String> {
    let mut prompt = base_system_prompt(config);
    for skill in store.list_skills(true)? {
        if skill.tier != 0 {
            continue;
        }
        if let Some(text) = &skill.instruction_content {
            prompt.push_str(&format!("\n\n## {}\n{}", skill.name, text));
        }
    }
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bs_domain::config::MemoryConfig;

    fn setup() -> (Store, String, MemoryConfig) {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        let config = MemoryConfig {
            observe_threshold_tokens: 100,
            reflect_threshold_tokens: 200,
            keep_last_messages: 3,
            retriever_url: None,
            top_k: 5,
        };
        (store, conv.id, config)
    }

    #[test]
    fn cache_marker_falls_back_to_system_prompt() {
        let (store, conv, config) = setup();
        store.add_message(&conv, "user", "hi").unwrap();

        let builder = ContextBuilder::new(&store, &config);
        let ctx = builder.build(&conv, "prompt", &[], false, None).unwrap();

        // No observation log: the single system block carries the marker.
        assert_eq!(ctx.system.len(), 1);
        assert!(ctx.system[0].cache);
    }

    #[test]
    fn observation_block_is_cached_and_ordered() {
        let (store, conv, config) = setup();
        store.add_message(&conv, "user", "hi").unwrap();
        store.upsert_observation_log(&conv, 1, "- likes tea", 4).unwrap();

        let memories = vec![MemoryHit {
            id: "m1".into(),
            category: "prefs".into(),
            content: "prefers Rust".into(),
        }];
        let builder = ContextBuilder::new(&store, &config);
        let ctx = builder
            .build(&conv, "prompt", &memories, true, Some("telegram"))
            .unwrap();

        assert_eq!(ctx.system.len(), 5);
        assert!(ctx.system[0].text.contains("Claude Code"));
        assert_eq!(ctx.system[1].text, "prompt");
        assert!(!ctx.system[1].cache);
        assert!(ctx.system[2].text.starts_with("Conversation Context (Observations)"));
        assert!(ctx.system[2].cache);
        assert!(ctx.system[3].text.contains("- [prefs] prefers Rust (id: m1)"));
        assert!(ctx.system[4].text.contains("telegram"));
    }

    #[test]
    fn web_channel_gets_no_hint() {
        let (store, conv, config) = setup();
        store.add_message(&conv, "user", "hi").unwrap();
        let builder = ContextBuilder::new(&store, &config);
        let ctx = builder.build(&conv, "prompt", &[], false, Some("web")).unwrap();
        assert_eq!(ctx.system.len(), 1);
    }

    #[test]
    fn tail_floor_applies_when_cursor_at_end() {
        let (store, conv, config) = setup();
        for i in 0..6 {
            store.add_message(&conv, "user", &format!("msg {i}")).unwrap();
        }
        // Pretend everything was observed.
        let state = store.memory_state(&conv).unwrap().unwrap();
        let updates = vec![(
            "observed_cursor_message_id".to_string(),
            serde_json::json!(6),
        )];
        assert!(store
            .update_memory_state(&conv, &updates, state.lock_version)
            .unwrap());

        let builder = ContextBuilder::new(&store, &config);
        let ctx = builder.build(&conv, "prompt", &[], false, None).unwrap();

        // Cursor is at the end, yet the floor still yields 3 messages.
        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.messages[0].content.extract_all_text(), "msg 3");
    }

    #[test]
    fn instruction_skills_extend_the_system_prompt() {
        use bs_store::SkillRow;

        let store = Store::open_in_memory().unwrap();
        let config = bs_domain::config::Config::default();
        store
            .upsert_skill(&SkillRow {
                id: "etiquette".into(),
                name: "house-style".into(),
                version: "1.0.0".into(),
                description: String::new(),
                tier: 0,
                transport: None,
                enabled: true,
                config: serde_json::json!({}),
                stdio_command: None,
                stdio_args: vec![],
                http_url: None,
                instruction_path: None,
                instruction_content: Some("Address the user as Doctor.".into()),
                owner: "system".into(),
                tags: None,
            })
            .unwrap();
        // Disabled instructions stay out.
        store
            .upsert_skill(&SkillRow {
                id: "off".into(),
                name: "disabled-skill".into(),
                version: "1.0.0".into(),
                description: String::new(),
                tier: 0,
                transport: None,
                enabled: false,
                config: serde_json::json!({}),
                stdio_command: None,
                stdio_args: vec![],
                http_url: None,
                instruction_path: None,
                instruction_content: Some("never seen".into()),
                owner: "system".into(),
                tags: None,
            })
            .unwrap();

        let prompt = system_prompt_with_instructions(&config, &store).unwrap();
        assert!(prompt.contains("## house-style"));
        assert!(prompt.contains("Address the user as Doctor."));
        assert!(!prompt.contains("never seen"));
    }

    #[test]
    fn flags_follow_thresholds() {
        let (store, conv, config) = setup();
        // 400+ chars => >= 100 estimated tokens.
        store.add_message(&conv, "user", &"x".repeat(450)).unwrap();
        let builder = ContextBuilder::new(&store, &config);
        let ctx = builder.build(&conv, "prompt", &[], false, None).unwrap();
        assert!(ctx.should_observe);
        assert!(!ctx.should_reflect);
    }
}
