//! Prompt templates for answer generation, one set per language.

use tracing::warn;

pub const FALLBACK_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplates {
    pub language: &'static str,
    pub system_prompt: &'static str,
    /// Placeholders: `{doc_num}`, `{chunk_text}`.
    pub document_prompt: &'static str,
    /// Placeholder: `{query}`.
    pub footer_prompt: &'static str,
    pub no_documents: &'static str,
}

const EN: PromptTemplates = PromptTemplates {
    language: "en",
    system_prompt: "You are an assistant that answers the user's question using only the \
documents provided. Ignore documents that are not relevant to the question. If the \
documents do not contain the answer, say that you cannot answer from them. Answer in the \
language of the question, precisely and concisely.",
    document_prompt: "## Document No: {doc_num}\n### Content: {chunk_text}",
    footer_prompt: "Based only on the documents above, answer the following question.\n\
## Question:\n{query}\n\n## Answer:",
    no_documents: "No relevant documents were found for this question.",
};

const AR: PromptTemplates = PromptTemplates {
    language: "ar",
    system_prompt: "أنت مساعد تجيب عن سؤال المستخدم بالاعتماد على المستندات المقدمة فقط. \
تجاهل المستندات غير المتعلقة بالسؤال. إذا لم تحتوِ المستندات على الإجابة فاذكر أنك لا تستطيع \
الإجابة منها. أجب بلغة السؤال بدقة وإيجاز.",
    document_prompt: "## المستند رقم: {doc_num}\n### المحتوى: {chunk_text}",
    footer_prompt: "بالاعتماد على المستندات أعلاه فقط، أجب عن السؤال التالي.\n\
## السؤال:\n{query}\n\n## الإجابة:",
    no_documents: "لم يتم العثور على مستندات متعلقة بهذا السؤال.",
};

static LOCALES: [PromptTemplates; 2] = [EN, AR];

fn lookup(language: &str) -> Option<&'static PromptTemplates> {
    let language = language.trim();
    LOCALES
        .iter()
        .find(|templates| templates.language.eq_ignore_ascii_case(language))
}

/// Resolves the template set for a primary language, falling back to the
/// default language and then to English.
#[derive(Debug, Clone, Copy)]
pub struct TemplateParser {
    templates: &'static PromptTemplates,
}

impl TemplateParser {
    pub fn new(primary: &str, default: &str) -> Self {
        let templates = lookup(primary)
            .or_else(|| {
                warn!(language = primary, fallback = default, "no templates for language");
                lookup(default)
            })
            .unwrap_or_else(|| {
                warn!(language = default, fallback = FALLBACK_LANGUAGE, "no templates for language");
                &LOCALES[0]
            });
        Self { templates }
    }

    pub fn language(&self) -> &'static str {
        self.templates.language
    }

    pub fn system_prompt(&self) -> &'static str {
        self.templates.system_prompt
    }

    /// `doc_num` is 1-based.
    pub fn document(&self, doc_num: usize, chunk_text: &str) -> String {
        self.templates
            .document_prompt
            .replace("{doc_num}", &doc_num.to_string())
            .replace("{chunk_text}", chunk_text)
    }

    pub fn footer(&self, query: &str) -> String {
        self.templates.footer_prompt.replace("{query}", query)
    }

    pub fn no_documents(&self) -> &'static str {
        self.templates.no_documents
    }
}

impl Default for TemplateParser {
    fn default() -> Self {
        Self {
            templates: &LOCALES[0],
        }
    }
}
