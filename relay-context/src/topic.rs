//! Topic classification.
//!
//! A cheap, deterministic classifier: extract entities and keywords,
//! pick a primary topic from a rule table, and hash the text prefix. The
//! hash keys the context cache, so repeated classification of the same
//! text must always produce the same value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How many characters of the combined text feed the topic hash.
const HASH_PREFIX_CHARS: usize = 500;

/// Hex characters kept from the digest.
const HASH_LEN: usize = 16;

/// Cap on capitalized-word entities.
const MAX_PROPER_NOUNS: usize = 5;

/// Cap on extracted keywords.
const MAX_KEYWORDS: usize = 10;

/// Known technology terms matched case-insensitively as entities.
const TECH_TERMS: &[&str] = &[
    "azure", "aws", "gcp", "kubernetes", "docker", "terraform", "redis", "postgres", "mysql",
    "mongodb", "kafka", "rabbitmq", "react", "python", "rust", "javascript", "typescript",
    "linux", "nginx", "graphql", "oauth", "devops", "serverless", "lambda", "vnet", "subnet",
    "firewall", "vpn", "dns", "ssl", "api",
];

/// Stop words excluded from keyword extraction.
const STOP_WORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "have", "what", "when", "where", "which",
    "will", "would", "could", "should", "about", "there", "their", "them", "then", "than",
    "your", "please", "can", "you", "how", "does", "for", "are", "was", "were", "been", "being",
    "into", "over", "under", "just", "like", "want", "need", "some", "any", "all", "not",
];

/// `(topic, trigger words)` rule table for primary-topic lookup.
const TOPIC_RULES: &[(&str, &[&str])] = &[
    ("cloud-infrastructure", &["azure", "aws", "gcp", "subscription", "tenant", "region", "vnet", "subnet"]),
    ("containers", &["kubernetes", "docker", "container", "pod", "helm", "cluster"]),
    ("data-stores", &["redis", "postgres", "mysql", "mongodb", "database", "query", "table", "index"]),
    ("messaging", &["kafka", "rabbitmq", "queue", "topic", "pubsub", "stream"]),
    ("networking", &["dns", "firewall", "vpn", "ssl", "certificate", "load", "balancer", "proxy"]),
    ("development", &["code", "function", "bug", "compile", "deploy", "test", "rust", "python", "javascript", "typescript"]),
    ("identity", &["oauth", "login", "token", "permission", "role", "group", "policy"]),
];

/// Fallback topic when no rule matches.
const GENERAL_TOPIC: &str = "general";

/// The classification of one turn's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicClassification {
    /// Best-matching topic from the rule table.
    pub primary_topic: String,
    /// Other matching topics, best first.
    pub secondary_topics: Vec<String>,
    /// Extracted entities (tech terms + proper nouns).
    pub entities: Vec<String>,
    /// Top keywords by frequency.
    pub keywords: Vec<String>,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    /// Stable 16-hex-char digest of the text prefix; the cache key input.
    pub hash: String,
}

/// Stable short digest of a string: first 16 hex chars of its SHA-256.
#[must_use]
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..HASH_LEN].to_string()
}

fn words_of(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Classify one turn's combined text.
#[must_use]
pub fn classify(text: &str) -> TopicClassification {
    let words = words_of(text);
    let lower_words: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();

    // Entities: known tech terms first, then capitalized words.
    let mut entities: Vec<String> = Vec::new();
    let mut term_hits = 0usize;
    for (word, lower) in words.iter().zip(&lower_words) {
        if TECH_TERMS.contains(&lower.as_str()) {
            term_hits += 1;
            if !entities.contains(lower) {
                entities.push(lower.clone());
            }
        } else if word.chars().next().is_some_and(char::is_uppercase)
            && word.len() > 1
            && entities.iter().filter(|e| !TECH_TERMS.contains(&e.as_str())).count()
                < MAX_PROPER_NOUNS
            && !entities.contains(word)
        {
            entities.push(word.clone());
        }
    }

    // Keywords: lowercased, length > 3, stop-word filtered, top 10 by
    // frequency; ties broken by first occurrence.
    let mut frequency: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, word) in lower_words.iter().enumerate() {
        if word.len() > 3 && !STOP_WORDS.contains(&word.as_str()) {
            let entry = frequency.entry(word.as_str()).or_insert((0, position));
            entry.0 += 1;
        }
    }
    let mut ranked: Vec<(&str, usize, usize)> =
        frequency.into_iter().map(|(w, (count, first))| (w, count, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    let keywords: Vec<String> = ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(w, _, _)| w.to_string())
        .collect();

    // Primary topic by rule-table scoring over keywords and entities.
    let mut scores: Vec<(&str, usize)> = TOPIC_RULES
        .iter()
        .map(|(topic, triggers)| {
            let score = lower_words
                .iter()
                .filter(|w| triggers.contains(&w.as_str()))
                .count();
            (*topic, score)
        })
        .filter(|(_, score)| *score > 0)
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let primary_topic = scores
        .first()
        .map_or(GENERAL_TOPIC.to_string(), |(topic, _)| (*topic).to_string());
    let secondary_topics: Vec<String> =
        scores.iter().skip(1).map(|(topic, _)| (*topic).to_string()).collect();

    let prefix: String = text.chars().take(HASH_PREFIX_CHARS).collect();
    TopicClassification {
        primary_topic,
        secondary_topics,
        entities,
        keywords,
        confidence: (term_hits as f64 * 0.1).min(1.0),
        hash: short_hash(&prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_deterministic() {
        let text = "How do I list my Azure subscriptions with Terraform?";
        let first = classify(text);
        for _ in 0..5 {
            assert_eq!(classify(text), first);
        }
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let classification = classify("hello world");
        assert_eq!(classification.hash.len(), 16);
        assert!(classification.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_depends_only_on_prefix() {
        let base = "a".repeat(500);
        let one = classify(&format!("{base}tail-one"));
        let two = classify(&format!("{base}tail-two"));
        assert_eq!(one.hash, two.hash);
    }

    #[test]
    fn tech_terms_become_entities() {
        let classification = classify("deploy redis on kubernetes in azure");
        assert!(classification.entities.contains(&"redis".to_string()));
        assert!(classification.entities.contains(&"kubernetes".to_string()));
        assert!(classification.entities.contains(&"azure".to_string()));
    }

    #[test]
    fn proper_nouns_are_capped_at_five() {
        let classification =
            classify("Alice Bob Carol Dave Erin Frank Grace talked about nothing technical");
        let proper: Vec<_> = classification
            .entities
            .iter()
            .filter(|e| e.chars().next().is_some_and(char::is_uppercase))
            .collect();
        assert_eq!(proper.len(), 5);
    }

    #[test]
    fn keywords_filter_stopwords_and_short_words() {
        let classification = classify("please tell me about the database migration strategy");
        assert!(classification.keywords.contains(&"database".to_string()));
        assert!(classification.keywords.contains(&"migration".to_string()));
        assert!(!classification.keywords.contains(&"the".to_string()));
        assert!(!classification.keywords.contains(&"about".to_string()));
        assert!(!classification.keywords.iter().any(|k| k.len() <= 3));
    }

    #[test]
    fn keyword_frequency_ranks_first() {
        let classification =
            classify("cluster cluster cluster deployment deployment migration");
        assert_eq!(classification.keywords[0], "cluster");
        assert_eq!(classification.keywords[1], "deployment");
    }

    #[test]
    fn primary_topic_from_rule_table() {
        assert_eq!(
            classify("list my azure subscriptions in this tenant").primary_topic,
            "cloud-infrastructure"
        );
        assert_eq!(
            classify("my kubernetes pod keeps crashing in the cluster").primary_topic,
            "containers"
        );
        assert_eq!(classify("good morning, how are you").primary_topic, "general");
    }

    #[test]
    fn confidence_scales_with_term_density() {
        let none = classify("hello there friend");
        assert_eq!(none.confidence, 0.0);
        let some = classify("azure aws kubernetes");
        assert!((some.confidence - 0.3).abs() < 1e-9);
        let many = classify(&"azure ".repeat(20));
        assert_eq!(many.confidence, 1.0);
    }
}
