use crate::messages::Message;

pub const TRUNCATION_MARKER: &str = "\n... [контекст обрезан]";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const SYSTEM_INSTRUCTION: &str =
    "Ты опытный бизнес-консультант. Отвечай кратко, по делу и только в заданном формате.";

const PROMPT_TEMPLATE: &str = "Проанализируй переписку рабочего чата за отчетный период и выдели главное.

СООБЩЕНИЯ:
{context}

Ответь строго тремя блоками, разделенными пустой строкой, каждый пункт начинай с \"- \":
ДОГОВОРЕННОСТИ:
- ключевые договоренности и действия, 3-6 пунктов

РИСКИ:
- слабые места и риски, до 3 пунктов

РЕКОМЕНДАЦИИ:
- конкретные рекомендации в повелительном наклонении, до 5 пунктов

Сосредоточься на том, как быстрее получить результат.";

/// Renders one chat as a labeled block of `[timestamp] sender: text` lines and cuts
/// it to `char_budget` characters. Only trailing content is ever removed.
pub fn build_context(chat_title: &str, messages: &[Message], char_budget: usize) -> String {
    let mut lines = Vec::with_capacity(messages.len() + 2);
    lines.push(format!("ЧАТ: {chat_title}"));
    for msg in messages {
        lines.push(format!(
            "[{}] {}: {}",
            msg.timestamp.format(TIMESTAMP_FORMAT),
            msg.sender,
            msg.text
        ));
    }
    lines.push(String::new());

    truncate_chars(lines.join("\n"), char_budget)
}

pub fn build_prompt(context: &str) -> String {
    PROMPT_TEMPLATE.replace("{context}", context)
}

fn truncate_chars(text: String, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => {
            let mut truncated = text[..cut].to_string();
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        }
        None => text,
    }
}
