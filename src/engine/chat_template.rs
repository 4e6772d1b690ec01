use anyhow::{Error as E, Result};
use minijinja::{context, Environment, ErrorKind};

use crate::prompting::ChatMessage;

const TEMPLATE_NAME: &str = "chat";

/// A Hugging Face chat template compiled once at load time.
pub struct ChatTemplate {
    env: Environment<'static>,
    bos_token: String,
    eos_token: String,
}

impl ChatTemplate {
    pub fn new(source: String, bos_token: Option<String>, eos_token: Option<String>) -> Result<Self> {
        let mut env = Environment::new();
        env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
        env.add_function("raise_exception", raise_exception);
        env.add_template_owned(TEMPLATE_NAME, source)
            .map_err(|e| E::msg(format!("Failed to compile chat template: {}", e)))?;

        Ok(Self {
            env,
            bos_token: bos_token.unwrap_or_default(),
            eos_token: eos_token.unwrap_or_default(),
        })
    }

    /// Renders a conversation and opens the assistant turn.
    pub fn render(&self, messages: &[ChatMessage]) -> Result<String> {
        let tmpl = self.env.get_template(TEMPLATE_NAME)?;
        let rendered = tmpl.render(context! {
            messages => messages,
            add_generation_prompt => true,
            bos_token => &self.bos_token,
            eos_token => &self.eos_token,
        })?;
        Ok(rendered)
    }
}

fn raise_exception(message: String) -> Result<String, minijinja::Error> {
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, message))
}

#[cfg(test)]
mod tests {
    use super::ChatTemplate;
    use crate::prompting::{ChatMessage, PromptBatch, PromptMode};

    const CHATML: &str = "{%- for message in messages %}\
{{- '<|im_start|>' + message.role + '\\n' + message.content + '<|im_end|>\\n' }}\
{%- endfor %}\
{%- if add_generation_prompt %}{{- '<|im_start|>assistant\\n' }}{%- endif %}";

    #[test]
    fn chatml_renders_nothink_conversation() {
        let template = ChatTemplate::new(CHATML.to_string(), None, Some("<|im_end|>".to_string())).unwrap();
        let PromptBatch::Chat(conversations) =
            PromptMode::from_nothink_flag(true).format(&["write a function".to_string()])
        else {
            panic!("expected chat batch");
        };

        let rendered = template.render(&conversations[0]).unwrap();
        assert_eq!(
            rendered,
            "<|im_start|>system\n/nothink<|im_end|>\n<|im_start|>user\nwrite a function<|im_end|>\n<|im_start|>assistant\n"
        );
    }

    #[test]
    fn python_string_methods_are_available() {
        let source = "{{ messages[0].content.strip() }}|\
{% if messages[0].content.strip().startswith('/no') %}nothink{% else %}think{% endif %}";
        let template = ChatTemplate::new(source.to_string(), None, None).unwrap();
        let rendered = template.render(&[ChatMessage::system(" /nothink ")]).unwrap();
        assert_eq!(rendered, "/nothink|nothink");
    }

    #[test]
    fn raise_exception_fails_rendering() {
        let source = "{% if messages[0].role != 'user' %}{{ raise_exception('user first') }}{% endif %}";
        let template = ChatTemplate::new(source.to_string(), None, None).unwrap();
        let err = template.render(&[ChatMessage::system("x")]).unwrap_err();
        assert!(err.to_string().contains("user first"));
    }

    #[test]
    fn bos_token_is_exposed() {
        let template =
            ChatTemplate::new("{{ bos_token }}{{ messages | length }}".to_string(), Some("<s>".to_string()), None).unwrap();
        assert_eq!(template.render(&[ChatMessage::user("hi")]).unwrap(), "<s>1");
    }
}
