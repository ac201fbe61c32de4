//! Keyword-based topic tagging.
//!
//! Each topic owns an ordered list of keyword phrases. An article is scored per
//! topic by counting whole-word keyword occurrences over `title title summary
//! content`; an occurrence is worth two points when the keyword first appears
//! within the headline/summary region and one point otherwise. Topics scoring
//! at least [`TAG_THRESHOLD`] are assigned.

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

pub const TAG_THRESHOLD: usize = 2;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TopicConfig {
    pub name: String,
    pub keywords: Vec<String>,
}

impl TopicConfig {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

struct Topic {
    name: String,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

pub struct TopicTagger {
    topics: Vec<Topic>,
}

impl TopicTagger {
    pub fn new(topics: Vec<TopicConfig>) -> Result<Self, regex::Error> {
        let topics = topics
            .into_iter()
            .map(|topic| {
                let keywords: Vec<String> =
                    topic.keywords.iter().map(|k| k.to_lowercase()).collect();
                let patterns = keywords
                    .iter()
                    .map(|k| Regex::new(&format!(r"\b{}\b", regex::escape(k))))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Topic {
                    name: topic.name,
                    keywords,
                    patterns,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { topics })
    }

    pub fn with_default_topics() -> Result<Self, regex::Error> {
        Self::new(default_topics())
    }

    /// Topics matching the article, in declaration order.
    pub fn tag(&self, title: &str, content: &str, summary: &str) -> Vec<String> {
        let haystack = format!("{} {} {} {}", title, title, summary, content).to_lowercase();
        let early_region = title.len() + summary.len();

        let mut tags = Vec::new();
        for topic in &self.topics {
            let mut score = 0;
            let mut matched = 0;

            for pattern in &topic.patterns {
                let mut occurrences = pattern.find_iter(&haystack);
                let Some(first) = occurrences.next() else {
                    continue;
                };
                let count = 1 + occurrences.count();
                let weight = if first.start() < early_region { 2 } else { 1 };
                score += count * weight;
                matched += 1;
            }

            if score >= TAG_THRESHOLD {
                debug!(
                    "Tagged article with \"{}\" (score: {}, keywords matched: {})",
                    topic.name, score, matched
                );
                tags.push(topic.name.clone());
            }
        }

        tags
    }

    pub fn all_topics(&self) -> Vec<&str> {
        self.topics.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn topic_keywords(&self, name: &str) -> &[String] {
        self.topics
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.keywords.as_slice())
            .unwrap_or(&[])
    }
}

/// The topic set shipped with the aggregator.
pub fn default_topics() -> Vec<TopicConfig> {
    vec![
        TopicConfig::new(
            "US Politics",
            &[
                "congress", "biden", "trump", "election", "senate", "house of representatives",
                "supreme court", "republican", "democrat", "gop", "oval office", "white house",
                "presidential", "governor", "mayor", "congressman", "senator", "impeachment",
                "campaign", "voter", "ballot", "midterm", "primary", "caucus", "swing state",
                "electoral college", "filibuster", "confirmation", "capitol hill",
                "washington dc",
            ],
        ),
        TopicConfig::new(
            "Global Politics",
            &[
                "international", "foreign policy", "diplomacy", "embassy", "ambassador",
                "nato", "united nations", "eu", "european union", "brexit", "g7", "g20",
                "china relations", "russia", "ukraine", "middle east", "israel", "palestine",
                "sanctions", "trade war", "summit", "treaty", "alliance", "geopolitical",
                "foreign minister", "prime minister", "president", "dictator", "regime",
                "conflict", "peace talks", "ceasefire", "humanitarian", "refugees",
            ],
        ),
        TopicConfig::new(
            "AI News",
            &[
                "artificial intelligence", "ai", "machine learning", "ml", "chatgpt", "gpt",
                "neural network", "deep learning", "algorithm", "automation", "robot",
                "openai", "google ai", "microsoft ai", "anthropic", "claude", "llm",
                "large language model", "generative ai", "computer vision", "nlp",
                "natural language processing", "tensorflow", "pytorch", "ai model",
                "ai training", "ai safety", "agi", "artificial general intelligence",
            ],
        ),
        TopicConfig::new(
            "Economic News",
            &[
                "federal reserve", "fed", "inflation", "gdp", "stock market", "recession",
                "economy", "economic", "finance", "financial", "interest rates",
                "unemployment", "jobs report", "consumer price index", "cpi", "dow jones",
                "nasdaq", "s&p 500", "bull market", "bear market", "volatile", "treasury",
                "bond", "yield", "monetary policy", "fiscal policy", "tax", "tariff",
                "trade deficit", "wall street", "earnings", "quarterly results", "profit",
                "revenue",
            ],
        ),
        TopicConfig::new(
            "Climate & Environment",
            &[
                "climate change", "global warming", "carbon emissions", "greenhouse gas",
                "renewable energy", "solar", "wind power", "electric vehicle", "ev",
                "sustainability", "environmental", "carbon footprint", "net zero",
                "paris agreement", "cop summit", "fossil fuels", "oil", "natural gas",
                "deforestation", "biodiversity", "conservation", "pollution", "recycling",
                "green energy", "carbon capture", "sea level rise", "extreme weather",
            ],
        ),
        TopicConfig::new(
            "Technology",
            &[
                "tech", "technology", "startup", "silicon valley", "software", "hardware",
                "cyber", "cybersecurity", "data breach", "hacking", "privacy", "encryption",
                "blockchain", "cryptocurrency", "bitcoin", "ethereum", "metaverse", "vr",
                "virtual reality", "augmented reality", "ar", "cloud computing", "saas",
                "platform", "app", "mobile", "innovation", "digital transformation",
                "tech company", "unicorn", "ipo", "venture capital", "funding",
            ],
        ),
        TopicConfig::new(
            "Health & Medicine",
            &[
                "healthcare", "health care", "medical", "medicine", "hospital", "doctor",
                "pandemic", "covid", "vaccine", "vaccination", "disease", "virus",
                "treatment", "therapy", "clinical trial", "fda", "drug", "pharmaceutical",
                "biotech", "mental health", "public health", "epidemic", "outbreak",
                "surgeon general", "cdc", "world health organization", "who", "patient",
                "diagnosis", "symptoms", "cure", "prevention", "immunity",
            ],
        ),
        TopicConfig::new(
            "Business",
            &[
                "corporate", "corporation", "ceo", "chief executive", "merger", "acquisition",
                "ipo", "initial public offering", "earnings", "quarterly", "revenue", "profit",
                "company", "business", "enterprise", "startup", "small business",
                "fortune 500", "market cap", "share price", "dividend", "investor",
                "board of directors", "shareholders", "layoffs", "hiring", "employment",
                "supply chain", "manufacturing", "retail", "e-commerce", "consumer",
            ],
        ),
    ]
}
