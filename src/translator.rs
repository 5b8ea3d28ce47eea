//! # Template query translation
//!
//! Turns a recognised question into a parameterized, read-only [`ReadQuery`]. There is no
//! free-form SQL generation: an ordered list of [`QueryTemplate`] matchers is evaluated
//! first-match-wins, and each template builds its statement from fixed text plus schema
//! identifiers and bound parameters.
//!
//! Templates, in evaluation order:
//!
//! | name | recognised by | statement |
//! |---|---|---|
//! | `count` | "how many" + an entity term | `COUNT(*)` over the table |
//! | `overall_average` | "average salary" + "overall" | `AVG(salary)` |
//! | `grouped_average` | "average salary" / "avg salary" | `AVG(salary)` per group |
//! | `hired` | "hired this year" / "hired in" | rows whose join year matches |
//! | `top_paid` | "top" + "highest" + "paid" | `ORDER BY salary DESC LIMIT N` |
//! | `listing` | "list ..." / "show ..." / "show me" | rows, optionally filtered by a skill |
//!
//! Table and column names are logical roles from [`TranslatorConfig`]. They are bound
//! against the current schema snapshot on every translation (see [`ColumnBindings`]), so a
//! database whose `salary` column is not literally called `annual_salary` still works when
//! the names are close enough.

use chrono::{Datelike, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::*;
use unicode_segmentation::UnicodeSegmentation;

use crate::catalog::{quote_ident, ReadQuery, SchemaSnapshot, SchemaTable};
use crate::config::TranslatorConfig;
use crate::fuzzy::{self, FuzzyMatch};

static TOP_N: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\btop\s+(-?\d+)").expect("static regex is valid"));
static TOP_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\btop\b").expect("static regex is valid"));
static HIRED_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"hired in (\d{4})\b").expect("static regex is valid"));

/// Words never resolved against schema or skill vocabulary.
const STOP_WORDS: &[&str] = &[
    "list", "show", "me", "all", "the", "with", "who", "whose", "have", "has", "know", "knows",
    "skill", "skills", "in", "of", "and", "for", "are", "that", "our", "any", "every", "from",
    "by", "what", "people", "person", "everyone", "someone",
];

/// Words of a lower-cased question worth resolving fuzzily.
fn content_words(lowered: &str) -> impl Iterator<Item = &str> {
    lowered
        .unicode_words()
        .filter(|word| word.chars().count() >= 3 && !STOP_WORDS.contains(word))
}

/// Concrete identifiers for the logical roles a template refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnBindings {
    pub table: String,
    pub salary: String,
    pub group: String,
    pub join_date: String,
    pub skills: String,
    pub name: String,
}

impl ColumnBindings {
    /// Bind every role against `schema`.
    ///
    /// A configured name present in the snapshot is used as is. Otherwise the closest
    /// candidate is taken when its score reaches `config.fuzzy_threshold`; failing that, the
    /// configured name is kept and execution will report the problem.
    pub fn resolve(config: &TranslatorConfig, schema: &SchemaSnapshot) -> Self {
        let table = bind_table(&config.table, schema, config.fuzzy_threshold);
        let meta = schema.get(&table);
        let column = |configured: &str| bind_column(configured, &table, meta, config.fuzzy_threshold);

        Self {
            salary: column(&config.salary_column),
            group: column(&config.group_column),
            join_date: column(&config.join_date_column),
            skills: column(&config.skills_column),
            name: column(&config.name_column),
            table,
        }
    }
}

fn bind_table(configured: &str, schema: &SchemaSnapshot, threshold: f64) -> String {
    if schema.is_empty() || schema.contains_key(configured) {
        return configured.to_string();
    }
    match fuzzy::best_match(configured, schema.keys().cloned(), threshold) {
        Some(found) => {
            debug!("Bound table {} to {} ({:.1})", configured, found.choice, found.score);
            found.choice
        }
        None => configured.to_string(),
    }
}

fn bind_column(configured: &str, table: &str, meta: Option<&SchemaTable>, threshold: f64) -> String {
    let Some(meta) = meta else {
        return configured.to_string();
    };
    if meta.has_column(configured) {
        return configured.to_string();
    }

    let names = meta.columns.iter().map(|c| c.name.clone());
    match fuzzy::best_match(configured, names, threshold) {
        Some(found) => {
            debug!(
                "Bound column {} to {}.{} ({:.1})",
                configured, table, found.choice, found.score
            );
            found.choice
        }
        None => configured.to_string(),
    }
}

/// Skill vocabulary: configured keywords followed by the distinct values found in the
/// skills column of the sample rows. Lower-cased, first occurrence wins.
fn skill_vocabulary(config: &TranslatorConfig, bindings: &ColumnBindings, schema: &SchemaSnapshot) -> Vec<String> {
    let sampled = schema
        .get(&bindings.table)
        .into_iter()
        .flat_map(|meta| meta.sample_rows.iter())
        .filter_map(|row| row.get(&bindings.skills).and_then(|v| v.as_str()))
        .flat_map(|cell| cell.split([',', ';']))
        .map(|s| s.trim().to_lowercase());

    let mut vocabulary: Vec<String> = Vec::new();
    for term in config
        .skill_keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .chain(sampled)
    {
        if !term.is_empty() && !vocabulary.contains(&term) {
            vocabulary.push(term);
        }
    }
    vocabulary
}

/// Everything a template may consult while building.
pub struct TranslationContext<'a> {
    pub config: &'a TranslatorConfig,
    pub bindings: ColumnBindings,
    pub vocabulary: Vec<String>,
    pub current_year: i32,
}

impl TranslationContext<'_> {
    fn table(&self) -> String {
        quote_ident(&self.bindings.table)
    }
}

/// One recognisable question shape.
pub trait QueryTemplate: Send + Sync {
    fn name(&self) -> &'static str;

    /// `lowered` is the trimmed, lower-cased question.
    fn matches(&self, lowered: &str, ctx: &TranslationContext<'_>) -> bool;

    fn build(&self, lowered: &str, ctx: &TranslationContext<'_>) -> ReadQuery;
}

fn mentions_average_salary(lowered: &str) -> bool {
    lowered.contains("average salary") || lowered.contains("avg salary")
}

pub struct CountTemplate;

impl QueryTemplate for CountTemplate {
    fn name(&self) -> &'static str {
        "count"
    }

    fn matches(&self, lowered: &str, ctx: &TranslationContext<'_>) -> bool {
        lowered.contains("how many")
            && ctx
                .config
                .entity_terms
                .iter()
                .any(|term| lowered.contains(&term.to_lowercase()))
    }

    fn build(&self, _lowered: &str, ctx: &TranslationContext<'_>) -> ReadQuery {
        ReadQuery::new(format!("SELECT COUNT(*) AS count FROM {}", ctx.table()))
    }
}

pub struct OverallAverageTemplate;

impl QueryTemplate for OverallAverageTemplate {
    fn name(&self) -> &'static str {
        "overall_average"
    }

    fn matches(&self, lowered: &str, _ctx: &TranslationContext<'_>) -> bool {
        mentions_average_salary(lowered) && lowered.contains("overall")
    }

    fn build(&self, _lowered: &str, ctx: &TranslationContext<'_>) -> ReadQuery {
        ReadQuery::new(format!(
            "SELECT AVG({}) AS avg_salary FROM {}",
            quote_ident(&ctx.bindings.salary),
            ctx.table()
        ))
    }
}

pub struct GroupedAverageTemplate;

impl QueryTemplate for GroupedAverageTemplate {
    fn name(&self) -> &'static str {
        "grouped_average"
    }

    fn matches(&self, lowered: &str, _ctx: &TranslationContext<'_>) -> bool {
        mentions_average_salary(lowered)
    }

    fn build(&self, _lowered: &str, ctx: &TranslationContext<'_>) -> ReadQuery {
        let group = quote_ident(&ctx.bindings.group);
        ReadQuery::new(format!(
            "SELECT {group}, AVG({}) AS avg_salary FROM {} GROUP BY {group}",
            quote_ident(&ctx.bindings.salary),
            ctx.table()
        ))
    }
}

pub struct HiredTemplate;

impl QueryTemplate for HiredTemplate {
    fn name(&self) -> &'static str {
        "hired"
    }

    fn matches(&self, lowered: &str, _ctx: &TranslationContext<'_>) -> bool {
        lowered.contains("hired this year") || lowered.contains("hired in")
    }

    fn build(&self, lowered: &str, ctx: &TranslationContext<'_>) -> ReadQuery {
        let year = HIRED_YEAR
            .captures(lowered)
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| ctx.current_year.to_string());

        ReadQuery::new(format!(
            "SELECT * FROM {} WHERE substr({}, 1, 4) = ?1 LIMIT {}",
            ctx.table(),
            quote_ident(&ctx.bindings.join_date),
            ctx.config.listing_limit
        ))
        .with_param(year)
    }
}

pub struct TopPaidTemplate;

impl TopPaidTemplate {
    fn requested(lowered: &str, config: &TranslatorConfig) -> i64 {
        let max = config.max_top_n.max(1);
        let Some(caps) = TOP_N.captures(lowered) else {
            return config.default_top_n.clamp(1, max);
        };
        let digits = &caps[1];
        match digits.parse::<i64>() {
            Ok(n) => n.clamp(1, max),
            Err(_) if digits.starts_with('-') => 1,
            Err(_) => max,
        }
    }
}

impl QueryTemplate for TopPaidTemplate {
    fn name(&self) -> &'static str {
        "top_paid"
    }

    fn matches(&self, lowered: &str, _ctx: &TranslationContext<'_>) -> bool {
        TOP_WORD.is_match(lowered) && lowered.contains("highest") && lowered.contains("paid")
    }

    fn build(&self, lowered: &str, ctx: &TranslationContext<'_>) -> ReadQuery {
        let salary = quote_ident(&ctx.bindings.salary);
        ReadQuery::new(format!(
            "SELECT {}, {}, {salary} FROM {} ORDER BY {salary} DESC LIMIT {}",
            quote_ident(&ctx.bindings.group),
            quote_ident(&ctx.bindings.name),
            ctx.table(),
            Self::requested(lowered, ctx.config)
        ))
    }
}

pub struct ListingTemplate {
    literal_skill: Option<Regex>,
}

impl ListingTemplate {
    pub fn new(config: &TranslatorConfig) -> Self {
        let alternatives: Vec<String> = config
            .skill_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();

        let literal_skill = if alternatives.is_empty() {
            None
        } else {
            match Regex::new(&format!(r"\b({})\b", alternatives.join("|"))) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Skill keywords disabled: {}", e);
                    None
                }
            }
        };

        Self { literal_skill }
    }

    /// The skill a listing question filters on, if any.
    pub fn skill_filter(&self, lowered: &str, ctx: &TranslationContext<'_>) -> Option<String> {
        if let Some(found) = self.literal_skill.as_ref().and_then(|re| re.find(lowered)) {
            return Some(found.as_str().to_string());
        }

        let entities: Vec<String> = ctx.config.entity_terms.iter().map(|t| t.to_lowercase()).collect();
        let table = ctx.bindings.table.to_lowercase();
        let mut best: Option<FuzzyMatch> = None;
        for word in content_words(lowered) {
            if entities.iter().any(|e| word.contains(e.as_str())) || word.contains(&table) {
                continue;
            }
            // Whole-word comparison: short keywords such as "hr" must not match inside
            // unrelated words.
            if let Some(found) = fuzzy::best_whole_match(
                word,
                ctx.vocabulary.iter().cloned(),
                ctx.config.fuzzy_threshold,
            ) {
                trace!("Listing term {} resolved to {} ({:.1})", word, found.choice, found.score);
                if best.as_ref().is_none_or(|b| found.score > b.score) {
                    best = Some(found);
                }
            }
        }
        best.map(|m| m.choice)
    }
}

impl QueryTemplate for ListingTemplate {
    fn name(&self) -> &'static str {
        "listing"
    }

    fn matches(&self, lowered: &str, _ctx: &TranslationContext<'_>) -> bool {
        lowered.starts_with("list ") || lowered.starts_with("show ") || lowered.contains("show me")
    }

    fn build(&self, lowered: &str, ctx: &TranslationContext<'_>) -> ReadQuery {
        let limit = ctx.config.listing_limit;
        match self.skill_filter(lowered, ctx) {
            Some(skill) => ReadQuery::new(format!(
                "SELECT * FROM {} WHERE lower({}) LIKE ?1 LIMIT {limit}",
                ctx.table(),
                quote_ident(&ctx.bindings.skills)
            ))
            .with_param(format!("%{}%", skill)),
            None => ReadQuery::new(format!("SELECT * FROM {} LIMIT {limit}", ctx.table())),
        }
    }
}

/// The outcome of a successful translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub template: &'static str,
    pub query: ReadQuery,
}

pub struct QueryTranslator {
    config: TranslatorConfig,
    templates: Vec<Box<dyn QueryTemplate>>,
}

impl QueryTranslator {
    pub fn from_config(config: &TranslatorConfig) -> Self {
        let templates: Vec<Box<dyn QueryTemplate>> = vec![
            Box::new(CountTemplate),
            Box::new(OverallAverageTemplate),
            Box::new(GroupedAverageTemplate),
            Box::new(HiredTemplate),
            Box::new(TopPaidTemplate),
            Box::new(ListingTemplate::new(config)),
        ];
        Self {
            config: config.clone(),
            templates,
        }
    }

    pub fn template_names(&self) -> Vec<&'static str> {
        self.templates.iter().map(|t| t.name()).collect()
    }

    /// Translate using the local calendar year for "hired this year".
    pub fn translate(&self, question: &str, schema: &SchemaSnapshot) -> Option<Translation> {
        self.translate_in_year(question, schema, Local::now().year())
    }

    /// Translate `question`, or `None` when no template recognises it.
    pub fn translate_in_year(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
        current_year: i32,
    ) -> Option<Translation> {
        let lowered = question.trim().to_lowercase();
        let bindings = ColumnBindings::resolve(&self.config, schema);
        let ctx = TranslationContext {
            config: &self.config,
            vocabulary: skill_vocabulary(&self.config, &bindings, schema),
            bindings,
            current_year,
        };

        let template = self.templates.iter().find(|t| t.matches(&lowered, &ctx))?;
        let query = template.build(&lowered, &ctx);
        debug!("Template {} -> {}", template.name(), query.sql);
        Some(Translation {
            template: template.name(),
            query,
        })
    }

    /// Best `table.column` candidates for a natural-language term.
    pub fn suggest_columns(&self, term: &str, schema: &SchemaSnapshot, top_n: usize) -> Vec<FuzzyMatch> {
        fuzzy::map_term_to_columns(term, schema, top_n)
    }

    /// [`Self::suggest_columns`] for every content word of `question`, keeping each column's
    /// best score. Best first, at most `top_n`.
    pub fn suggest_columns_for_question(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
        top_n: usize,
    ) -> Vec<FuzzyMatch> {
        let lowered = question.to_lowercase();
        let mut merged: Vec<FuzzyMatch> = Vec::new();
        for word in content_words(&lowered) {
            for candidate in self.suggest_columns(word, schema, top_n) {
                match merged.iter_mut().find(|m| m.choice == candidate.choice) {
                    Some(existing) if existing.score < candidate.score => *existing = candidate,
                    Some(_) => {}
                    None => merged.push(candidate),
                }
            }
        }
        merged.sort_by(|a, b| b.score.total_cmp(&a.score));
        merged.truncate(top_n);
        merged
    }
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self::from_config(&TranslatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::catalog::{SchemaCatalog, SchemaColumn};

    fn sample_schema() -> SchemaSnapshot {
        let (_dir, catalog) = sample_catalog();
        catalog.get_tables().unwrap()
    }

    fn translate(question: &str) -> Translation {
        QueryTranslator::default()
            .translate_in_year(question, &sample_schema(), 2024)
            .unwrap_or_else(|| panic!("no template for {question:?}"))
    }

    #[test]
    fn test_count() {
        let t = translate("How many employees are there?");
        assert_eq!(t.template, "count");
        assert_eq!(t.query.sql, "SELECT COUNT(*) AS count FROM employees");
        assert!(t.query.params.is_empty());
    }

    #[test]
    fn test_averages() {
        let t = translate("average salary by department");
        assert_eq!(t.template, "grouped_average");
        assert_eq!(
            t.query.sql,
            "SELECT dept_id, AVG(annual_salary) AS avg_salary FROM employees GROUP BY dept_id"
        );

        let t = translate("What is the overall avg salary?");
        assert_eq!(t.template, "overall_average");
        assert_eq!(t.query.sql, "SELECT AVG(annual_salary) AS avg_salary FROM employees");
    }

    #[test]
    fn test_hired_binds_year() {
        let t = translate("Who was hired this year?");
        assert_eq!(t.template, "hired");
        assert_eq!(
            t.query.sql,
            "SELECT * FROM employees WHERE substr(join_date, 1, 4) = ?1 LIMIT 500"
        );
        assert_eq!(t.query.params, vec!["2024"]);

        let t = translate("employees hired in 2019");
        assert_eq!(t.query.params, vec!["2019"]);

        let t = translate("employees hired in march");
        assert_eq!(t.query.params, vec!["2024"]);
    }

    #[test]
    fn test_top_paid_clamps_n() {
        let sql = |q: &str| translate(q).query.sql;
        assert_eq!(
            sql("top 3 highest paid employees"),
            "SELECT dept_id, full_name, annual_salary FROM employees ORDER BY annual_salary DESC LIMIT 3"
        );
        assert!(sql("top 0 highest paid").ends_with("LIMIT 1"));
        assert!(sql("top -5 highest paid").ends_with("LIMIT 1"));
        assert!(sql("top 1000 highest paid").ends_with("LIMIT 100"));
        assert!(sql("top 99999999999999999999999 highest paid").ends_with("LIMIT 100"));
        assert!(sql("top highest paid people").ends_with("LIMIT 10"));
    }

    #[test]
    fn test_listing_literal_skill() {
        let t = translate("List employees with Python skills");
        assert_eq!(t.template, "listing");
        assert_eq!(
            t.query.sql,
            "SELECT * FROM employees WHERE lower(skills) LIKE ?1 LIMIT 500"
        );
        assert_eq!(t.query.params, vec!["%python%"]);
    }

    #[test]
    fn test_listing_fuzzy_skill_and_unfiltered() {
        let t = translate("list employees who know pythn");
        assert_eq!(t.query.params, vec!["%python%"]);

        // A value that only appears in the sample rows.
        let t = translate("show me everyone good at roadmap");
        assert_eq!(t.query.params, vec!["%roadmaps%"]);

        let t = translate("list all employees");
        assert_eq!(t.query.sql, "SELECT * FROM employees LIMIT 500");
        assert!(t.query.params.is_empty());
    }

    #[test]
    fn test_listing_ignores_short_keywords_inside_words() {
        for question in [
            "list employees who joined through referrals",
            "show me three employees named chris",
            "list employees that know html",
        ] {
            let t = translate(question);
            assert_eq!(t.query.sql, "SELECT * FROM employees LIMIT 500", "{question}");
            assert!(t.query.params.is_empty(), "{question}");
        }
    }

    #[test]
    fn test_translation_miss() {
        let translator = QueryTranslator::default();
        let schema = sample_schema();
        assert!(translator.translate("tell me a joke", &schema).is_none());
        assert!(translator.translate("what is the turnover rate", &schema).is_none());
        assert!(translator.translate("", &schema).is_none());
    }

    #[test]
    fn test_template_order() {
        assert_eq!(
            QueryTranslator::default().template_names(),
            vec!["count", "overall_average", "grouped_average", "hired", "top_paid", "listing"]
        );
        // "how many" wins over the listing prefix.
        assert_eq!(translate("show me how many employees we have").template, "count");
    }

    #[test]
    fn test_bindings_follow_schema() {
        let columns = |names: &[&str]| {
            names
                .iter()
                .map(|n| SchemaColumn {
                    name: n.to_string(),
                    data_type: "TEXT".to_string(),
                })
                .collect()
        };
        let mut schema = SchemaSnapshot::new();
        schema.insert(
            "employee".to_string(),
            SchemaTable {
                columns: columns(&["id", "name", "dept_id", "salary", "join_date", "skills"]),
                ..Default::default()
            },
        );

        let bindings = ColumnBindings::resolve(&TranslatorConfig::default(), &schema);
        assert_eq!(bindings.table, "employee");
        assert_eq!(bindings.salary, "salary");
        assert_eq!(bindings.name, "name");
        assert_eq!(bindings.group, "dept_id");

        let t = QueryTranslator::default()
            .translate_in_year("top 2 highest paid", &schema, 2024)
            .unwrap();
        assert_eq!(
            t.query.sql,
            "SELECT dept_id, name, salary FROM employee ORDER BY salary DESC LIMIT 2"
        );
    }

    #[test]
    fn test_unresolvable_names_are_kept() {
        let bindings = ColumnBindings::resolve(&TranslatorConfig::default(), &SchemaSnapshot::new());
        assert_eq!(bindings.table, "employees");
        assert_eq!(bindings.salary, "annual_salary");
    }

    #[test]
    fn test_suggest_columns() {
        let suggestions = QueryTranslator::default().suggest_columns("salary", &sample_schema(), 2);
        assert_eq!(suggestions[0].choice, "employees.annual_salary");

        let suggestions = QueryTranslator::default().suggest_columns_for_question(
            "what is the typical salary here",
            &sample_schema(),
            3,
        );
        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0].choice, "employees.annual_salary");
        assert_eq!(suggestions[0].score, 90.0);
        assert!(QueryTranslator::default()
            .suggest_columns_for_question("is it", &sample_schema(), 3)
            .is_empty());
    }
}
