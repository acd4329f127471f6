use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 支持的答题卡图片扩展名
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// 判断文件是否为支持的图片
pub fn is_allowed_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 从文件夹中加载所有答题卡图片路径（按文件名排序）
pub async fn load_all_images(folder_path: &str) -> Result<Vec<PathBuf>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut images = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if is_allowed_image(&path) {
            images.push(path);
        } else {
            tracing::warn!(
                "跳过不支持的文件类型: {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );
        }
    }

    images.sort();
    tracing::info!("在 {} 中找到 {} 张答题卡图片", folder_path, images.len());

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_allowed_image() {
        assert!(is_allowed_image(Path::new("sheet.PNG")));
        assert!(is_allowed_image(Path::new("dir/sheet.jpeg")));
        assert!(!is_allowed_image(Path::new("notes.txt")));
        assert!(!is_allowed_image(Path::new("no_extension")));
    }

    #[tokio::test]
    async fn test_load_all_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"x").unwrap();

        let images = load_all_images(dir.path().to_str().unwrap()).await.unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.jpg"]);
    }

    #[test]
    fn test_missing_folder_is_error() {
        let result = tokio_test::block_on(load_all_images("/definitely/not/here"));
        assert!(result.is_err());
    }
}
