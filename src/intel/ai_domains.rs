//! Known generative-AI service domains
//!
//! Suffix matching honors dot boundaries: `cdn.openai.com` matches the
//! `openai.com` entry, `notopenai.com` does not.

use std::collections::HashMap;

/// Base domain -> service category
const AI_DOMAINS: &[(&str, &str)] = &[
    // Major LLM providers
    ("openai.com", "LLM"),
    ("chatgpt.com", "LLM"),
    ("oaistatic.com", "LLM"),
    ("oaiusercontent.com", "LLM"),
    ("anthropic.com", "LLM"),
    ("claude.ai", "LLM"),
    ("cohere.ai", "LLM"),
    ("mistral.ai", "LLM"),
    ("ai21.com", "LLM"),
    ("perplexity.ai", "LLM"),
    ("pplx.ai", "LLM"),
    ("you.com", "LLM"),
    ("phind.com", "LLM"),
    ("poe.com", "LLM"),
    ("character.ai", "LLM"),
    ("inflection.ai", "LLM"),
    ("pi.ai", "LLM"),
    ("deepseek.com", "LLM"),
    ("x.ai", "LLM"),
    // Google AI
    ("gemini.google.com", "LLM"),
    ("bard.google.com", "LLM"),
    ("generativelanguage.googleapis.com", "LLM"),
    ("ai.google.dev", "LLM"),
    ("vertexai.google.com", "LLM"),
    ("notebooklm.google.com", "LLM"),
    ("aistudio.google.com", "LLM"),
    // Microsoft / GitHub Copilot
    ("githubcopilot.com", "Code AI"),
    ("copilot-proxy.githubusercontent.com", "Code AI"),
    ("copilot.microsoft.com", "LLM"),
    ("copilot.cloud.microsoft", "LLM"),
    ("designer.microsoft.com", "Image Gen"),
    // Meta AI
    ("ai.meta.com", "LLM"),
    ("llama.meta.com", "LLM"),
    // Image & video generation
    ("midjourney.com", "Image Gen"),
    ("stability.ai", "Image Gen"),
    ("clipdrop.co", "Image Gen"),
    ("dreamstudio.ai", "Image Gen"),
    ("runwayml.com", "Video Gen"),
    ("leonardo.ai", "Image Gen"),
    ("pika.art", "Video Gen"),
    ("sora.com", "Video Gen"),
    ("ideogram.ai", "Image Gen"),
    ("playground.com", "Image Gen"),
    ("nightcafe.studio", "Image Gen"),
    ("artbreeder.com", "Image Gen"),
    ("hotpot.ai", "Image Gen"),
    ("starryai.com", "Image Gen"),
    ("deepdreamgenerator.com", "Image Gen"),
    ("craiyon.com", "Image Gen"),
    ("lexica.art", "Image Gen"),
    ("openart.ai", "Image Gen"),
    ("tensor.art", "Image Gen"),
    ("civitai.com", "Image Gen"),
    ("fal.ai", "Image Gen"),
    ("luma.ai", "Video Gen"),
    ("kaiber.ai", "Video Gen"),
    ("heygen.com", "Video Gen"),
    ("synthesia.io", "Video Gen"),
    ("descript.com", "Video Gen"),
    // Code assistants
    ("cursor.sh", "Code AI"),
    ("cursor.com", "Code AI"),
    ("tabnine.com", "Code AI"),
    ("codeium.com", "Code AI"),
    ("windsurf.com", "Code AI"),
    ("sourcegraph.com", "Code AI"),
    ("cody.dev", "Code AI"),
    ("replit.com", "Code AI"),
    ("repl.co", "Code AI"),
    ("codium.ai", "Code AI"),
    ("aider.chat", "Code AI"),
    ("continue.dev", "Code AI"),
    ("supermaven.com", "Code AI"),
    ("bolt.new", "Code AI"),
    ("v0.dev", "Code AI"),
    // Audio & speech
    ("elevenlabs.io", "Voice AI"),
    ("suno.ai", "Voice AI"),
    ("udio.com", "Voice AI"),
    ("speechify.com", "Voice AI"),
    ("murf.ai", "Voice AI"),
    ("resemble.ai", "Voice AI"),
    ("play.ht", "Voice AI"),
    ("wellsaidlabs.com", "Voice AI"),
    ("lovo.ai", "Voice AI"),
    ("uberduck.ai", "Voice AI"),
    // Writing & productivity
    ("jasper.ai", "Writing AI"),
    ("writesonic.com", "Writing AI"),
    ("copy.ai", "Writing AI"),
    ("rytr.me", "Writing AI"),
    ("wordtune.com", "Writing AI"),
    ("grammarly.com", "Writing AI"),
    ("mem.ai", "Writing AI"),
    ("otter.ai", "Writing AI"),
    ("fireflies.ai", "Writing AI"),
    // Agent platforms
    ("langchain.com", "Agent/Tool"),
    ("crewai.com", "Agent/Tool"),
    ("relevanceai.com", "Agent/Tool"),
    // ML infrastructure / API providers
    ("huggingface.co", "ML Infra"),
    ("hf.co", "ML Infra"),
    ("replicate.com", "ML Infra"),
    ("modal.com", "ML Infra"),
    ("together.xyz", "ML Infra"),
    ("fireworks.ai", "ML Infra"),
    ("groq.com", "ML Infra"),
    ("anyscale.com", "ML Infra"),
    ("baseten.co", "ML Infra"),
    ("deepinfra.com", "ML Infra"),
    ("cerebras.ai", "ML Infra"),
    ("sambanova.ai", "ML Infra"),
    ("octoai.cloud", "ML Infra"),
    ("lepton.ai", "ML Infra"),
    ("wandb.ai", "ML Infra"),
    ("neptune.ai", "ML Infra"),
];

/// Suffix-indexed AI domain table.
pub struct AiDomainTable {
    by_base: HashMap<&'static str, &'static str>,
}

impl AiDomainTable {
    pub fn new() -> Self {
        Self {
            by_base: AI_DOMAINS.iter().copied().collect(),
        }
    }

    /// Match a hostname against the table. Returns the matched base domain
    /// and its category. Case-insensitive; subdomains match at dot
    /// boundaries only.
    pub fn lookup(&self, domain: &str) -> Option<(&'static str, &'static str)> {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return None;
        }

        // Walk suffixes at label boundaries: "a.b.c.d" -> "a.b.c.d",
        // "b.c.d", "c.d", "d".
        let mut rest = domain.as_str();
        loop {
            if let Some((base, category)) = self.by_base.get_key_value(rest) {
                return Some((*base, *category));
            }
            match rest.find('.') {
                Some(dot) => rest = &rest[dot + 1..],
                None => return None,
            }
        }
    }

    pub fn is_ai_domain(&self, domain: &str) -> bool {
        self.lookup(domain).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }
}

impl Default for AiDomainTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_subdomain_match() {
        let table = AiDomainTable::new();
        assert_eq!(table.lookup("openai.com"), Some(("openai.com", "LLM")));
        assert_eq!(table.lookup("api.openai.com"), Some(("openai.com", "LLM")));
        assert_eq!(table.lookup("API.OPENAI.COM"), Some(("openai.com", "LLM")));
    }

    #[test]
    fn dot_boundary_is_required() {
        let table = AiDomainTable::new();
        assert!(table.lookup("notopenai.com").is_none());
        assert!(table.lookup("openai.community").is_none());
    }

    #[test]
    fn deep_subdomain_entries_win() {
        let table = AiDomainTable::new();
        // gemini.google.com is listed; plain google.com is not an AI domain
        assert!(table.is_ai_domain("gemini.google.com"));
        assert!(!table.is_ai_domain("mail.google.com"));
    }

    #[test]
    fn empty_and_trailing_dot() {
        let table = AiDomainTable::new();
        assert!(table.lookup("").is_none());
        assert!(table.is_ai_domain("claude.ai."));
    }
}
