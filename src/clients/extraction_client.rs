//! 提取客户端 - 基础设施层
//!
//! 只负责"图片 → 原始文本"能力，不关心解析与存储
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 图片以 base64 data URL 形式随消息发送
//! - 兼容 OpenAI API 的服务（如 Gemini, Azure, Doubao 等）

use std::path::Path;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ExtractionError;

const SYSTEM_MESSAGE: &str = "You read handwritten marks from scanned exam answer sheets \
and reply with JSON only.";

const EXTRACTION_PROMPT: &str = r#"Analyze this answer sheet image and extract ONLY the following information in JSON format:

1. Roll Number (exactly as shown, including any letter prefix)
2. For each question (Q1-Q6):
   - Extract marks for parts a, b, c, d
   - If a part has no marks, use 0
   - Marks must be numbers, not strings
3. Total marks as shown on the sheet

Rules:
- Look for marks in the "Marks Awarded" row
- Some questions may have a subtotal below them; do not treat it as a part mark
- Only extract marks that are clearly visible

Return the data in exactly this structure:
{
    "roll_number": "A...",
    "questions": {
        "Q1": {"a": 0, "b": 0, "c": 0, "d": 0},
        "Q2": {"a": 0, "b": 0, "c": 0, "d": 0},
        "Q3": {"a": 0, "b": 0, "c": 0, "d": 0},
        "Q4": {"a": 0, "b": 0, "c": 0, "d": 0},
        "Q5": {"a": 0, "b": 0, "c": 0, "d": 0},
        "Q6": {"a": 0, "b": 0, "c": 0, "d": 0}
    },
    "total_marks": 0
}"#;

/// 提取能力：图片 → 原始文本
///
/// 单次调用，无重试；失败时调用方跳过该图片
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, image: &Path) -> Result<String, ExtractionError>;
}

/// 带超时的提取调用，超时视为提取失败
pub async fn extract_with_timeout(
    client: &dyn ExtractionClient,
    image: &Path,
    timeout: Duration,
) -> Result<String, ExtractionError> {
    match tokio::time::timeout(timeout, client.extract(image)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("提取超时 ({} 秒): {}", timeout.as_secs(), image.display());
            Err(ExtractionError::Timeout {
                secs: timeout.as_secs(),
            })
        }
    }
}

/// 基于视觉大模型的提取客户端
pub struct VisionExtractionClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl VisionExtractionClient {
    /// 创建新的提取客户端
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    /// 读取图片并编码为 data URL
    async fn image_data_url(image: &Path) -> Result<String, ExtractionError> {
        let unreadable = |reason: String| ExtractionError::ImageUnreadable {
            path: image.display().to_string(),
            reason,
        };

        let mime = image_mime_type(image)
            .ok_or_else(|| unreadable("不支持的图片格式".to_string()))?;

        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| unreadable(e.to_string()))?;

        if bytes.is_empty() {
            return Err(unreadable("图片文件为空".to_string()));
        }

        debug!("图片大小: {} 字节 ({})", bytes.len(), mime);

        Ok(format!("data:{};base64,{}", mime, BASE64.encode(&bytes)))
    }

    fn service_error(
        &self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> ExtractionError {
        ExtractionError::ServiceUnavailable {
            model: self.model_name.clone(),
            source: Box::new(source),
        }
    }
}

#[async_trait]
impl ExtractionClient for VisionExtractionClient {
    async fn extract(&self, image: &Path) -> Result<String, ExtractionError> {
        debug!("调用提取服务，模型: {}，图片: {}", self.model_name, image.display());

        let data_url = Self::image_data_url(image).await?;

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_MESSAGE)
            .build()
            .map_err(|e| self.service_error(e))?;

        // 文本 + 图片的多部分用户消息
        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: EXTRACTION_PROMPT.to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: data_url,
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()
            .map_err(|e| self.service_error(e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| self.service_error(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("提取服务调用失败: {}", e);
            self.service_error(e)
        })?;

        debug!("提取服务调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ExtractionError::EmptyResponse {
                model: self.model_name.clone(),
            })?;

        Ok(content)
    }
}

/// 根据扩展名推断 MIME 类型
fn image_mime_type(image: &Path) -> Option<&'static str> {
    let ext = image.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
