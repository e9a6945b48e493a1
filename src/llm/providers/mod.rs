mod deepseek;
mod openai;

pub use deepseek::DeepSeekProvider;
pub use openai::OpenAiProvider;
