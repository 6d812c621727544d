#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Agreements,
    Risks,
    Recommendations,
}

const HEADERS: &[(&str, Section)] = &[
    ("ДОГОВОРЕННОСТИ:", Section::Agreements),
    ("РИСКИ:", Section::Risks),
    ("РЕКОМЕНДАЦИИ:", Section::Recommendations),
    ("AGREEMENTS:", Section::Agreements),
    ("RISKS:", Section::Risks),
    ("RECOMMENDATIONS:", Section::Recommendations),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSections {
    pub agreements: Vec<String>,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
    /// No bulleted section could be recognized; the raw text became the only recommendation.
    pub malformed: bool,
}

impl ParsedSections {
    fn is_empty(&self) -> bool {
        self.agreements.is_empty() && self.risks.is_empty() && self.recommendations.is_empty()
    }

    fn push(&mut self, section: Section, item: String) {
        match section {
            Section::Agreements => self.agreements.push(item),
            Section::Risks => self.risks.push(item),
            Section::Recommendations => self.recommendations.push(item),
        }
    }
}

/// Splits the provider reply into blank-line separated blocks, assigns each block to a
/// section by its header (case-insensitive) and keeps the `-`/`•` bulleted lines.
pub fn parse_response(raw: &str) -> ParsedSections {
    let mut parsed = ParsedSections::default();
    let normalized = raw.replace("\r\n", "\n");

    for block in normalized.split("\n\n") {
        let mut current = None;
        for line in block.lines() {
            let line = line.trim();
            match (current, bullet_item(line)) {
                (Some(section), Some(item)) => {
                    if !item.is_empty() {
                        parsed.push(section, item.to_string());
                    }
                }
                _ => {
                    if let Some(section) = header_section(line) {
                        current = Some(section);
                    }
                }
            }
        }
    }

    if parsed.is_empty() {
        parsed.malformed = true;
        if !raw.trim().is_empty() {
            parsed.recommendations.push(raw.to_string());
        }
    }
    parsed
}

/// Headers are compared upper-cased with Ё folded to Е.
fn header_section(line: &str) -> Option<Section> {
    let upper = line.to_uppercase().replace('Ё', "Е");
    HEADERS
        .iter()
        .find(|(header, _)| upper.contains(header))
        .map(|(_, section)| *section)
}

fn bullet_item(line: &str) -> Option<&str> {
    line.strip_prefix('-')
        .or_else(|| line.strip_prefix('•'))
        .map(str::trim)
}
