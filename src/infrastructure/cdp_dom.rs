//! CDP 页面桥 - 基础设施层
//!
//! 持有唯一的 Page 资源，把 PageDom 的每个能力翻译成一段页面内脚本。
//! 页面侧维护一张节点注册表（WeakMap 正查 + WeakRef 反查，递增编号），
//! 节点被宿主销毁后注册表条目自动失效；变更观察器把记录攒在页面侧队列里，
//! 由 Rust 侧定期取走。

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{MutationRecord, NodeId, TextNodeSnapshot};
use async_trait::async_trait;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::page_dom::PageDom;

/// 页面侧引导脚本
///
/// 占位符在构造时替换：
/// - `__LABELS__`: 字幕容器的 aria-label 列表（JSON 数组）
/// - `__CLASSES__`: 字幕容器的 class 列表（JSON 数组）
/// - `__SELECTOR__`: 两组选择器拼出的组合选择器（JSON 字符串）
const BOOTSTRAP_JS: &str = r#"
(() => {
  if (window.__subtran) {
    window.__subtran.enabled = true;
    return true;
  }

  const labels = __LABELS__;
  const classes = __CLASSES__;
  const containerSelector = __SELECTOR__;

  const st = {
    enabled: true,
    nextId: 1,
    refs: new Map(),
    ids: new WeakMap(),
    records: [],

    isContainer(el) {
      if (!el || el.nodeType !== Node.ELEMENT_NODE) return false;
      const label = el.getAttribute ? el.getAttribute('aria-label') : null;
      if (label && labels.includes(label)) return true;
      return classes.some((c) => el.classList && el.classList.contains(c));
    },

    inContainer(node) {
      let cur = node;
      while (cur && cur !== document.body) {
        if (st.isContainer(cur)) return true;
        cur = cur.parentNode;
      }
      return false;
    },

    register(node) {
      const known = st.ids.get(node);
      if (known) return known;
      const id = st.nextId++;
      st.ids.set(node, id);
      st.refs.set(id, new WeakRef(node));
      return id;
    },

    resolve(id) {
      const ref = st.refs.get(id);
      const node = ref ? ref.deref() : null;
      if (!node || !node.isConnected) {
        st.refs.delete(id);
        return null;
      }
      return node;
    },

    containers() {
      const found = document.querySelectorAll(containerSelector);
      return Array.from(found).map((el) => st.register(el));
    },

    collectTexts(root, limit) {
      const out = [];
      const walker = document.createTreeWalker(root, NodeFilter.SHOW_TEXT);
      let node;
      while ((node = walker.nextNode()) && out.length < limit) {
        const text = node.textContent;
        if (text && text.trim().length > 0) {
          out.push({ id: st.register(node), text: text });
        }
      }
      return out;
    },

    collectIn(id, limit) {
      const root = st.resolve(id);
      return root ? st.collectTexts(root, limit) : [];
    },

    collectFallback(limit) {
      return st.collectTexts(document.body, limit);
    },

    nodeText(id) {
      const node = st.resolve(id);
      return node ? node.textContent : null;
    },

    setNodeText(id, text) {
      const node = st.resolve(id);
      if (!node) return false;
      node.textContent = text;
      return true;
    },

    flashIndicator(id) {
      const node = st.resolve(id);
      const el = node && (node.nodeType === Node.ELEMENT_NODE ? node : node.parentElement);
      if (!el || !el.style) return false;
      el.style.borderLeft = '3px solid #4285f4';
      el.style.paddingLeft = '8px';
      el.style.backgroundColor = 'rgba(66, 133, 244, 0.1)';
      setTimeout(() => {
        if (el.style) {
          el.style.borderLeft = '';
          el.style.paddingLeft = '';
          el.style.backgroundColor = '';
        }
      }, 10000);
      return true;
    },

    showNotice(title, body) {
      const box = document.createElement('div');
      box.style.cssText =
        'position:fixed;top:20px;right:20px;background:#dc3545;color:white;' +
        'padding:15px 20px;border-radius:8px;font-family:Arial,sans-serif;' +
        'font-size:14px;z-index:10000;box-shadow:0 4px 12px rgba(0,0,0,0.3);max-width:300px;';
      const head = document.createElement('div');
      head.style.cssText = 'font-weight:bold;margin-bottom:8px;';
      head.textContent = title;
      const msg = document.createElement('div');
      msg.textContent = body;
      box.appendChild(head);
      box.appendChild(msg);
      document.body.appendChild(box);
      setTimeout(() => {
        if (box.parentNode) box.remove();
      }, 10000);
      return true;
    },

    drain() {
      return st.records.splice(0, st.records.length);
    },

    disconnect() {
      st.enabled = false;
      st.observer.disconnect();
      st.records.length = 0;
      return true;
    },
  };

  st.observer = new MutationObserver((mutations) => {
    if (!st.enabled) return;
    for (const m of mutations) {
      if (m.type === 'childList') {
        for (const node of m.addedNodes) {
          if (node.nodeType === Node.ELEMENT_NODE) {
            st.records.push({
              kind: 'element_added',
              is_container: st.isContainer(node),
              has_container_descendant:
                !!(node.querySelector && node.querySelector(containerSelector)),
            });
          } else if (node.nodeType === Node.TEXT_NODE) {
            st.records.push({
              kind: 'text_added',
              in_container: st.inContainer(node),
              text: (node.textContent || '').trim(),
            });
          }
        }
      } else if (m.type === 'characterData') {
        st.records.push({ kind: 'character_data', in_container: st.inContainer(m.target) });
      }
    }
    // 防止 Rust 侧停摆时队列无限增长
    if (st.records.length > 512) {
      st.records.splice(0, st.records.length - 512);
    }
  });
  st.observer.observe(document.body, { childList: true, subtree: true, characterData: true });

  window.__subtran = st;
  return true;
})()
"#;

/// CDP 页面桥
pub struct CdpDom {
    page: Page,
    bootstrap: String,
}

impl CdpDom {
    /// 创建页面桥，把配置里的容器选择器注入引导脚本
    pub fn new(page: Page, config: &Config) -> Self {
        let labels = serde_json::to_string(&config.caption_labels).unwrap_or_else(|_| "[]".into());
        let classes =
            serde_json::to_string(&config.caption_classes).unwrap_or_else(|_| "[]".into());
        let selector = combined_selector(&config.caption_labels, &config.caption_classes);
        let selector_json = serde_json::to_string(&selector).unwrap_or_else(|_| "\"\"".into());

        let bootstrap = BOOTSTRAP_JS
            .replace("__LABELS__", &labels)
            .replace("__CLASSES__", &classes)
            .replace("__SELECTOR__", &selector_json);

        Self { page, bootstrap }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }
}

#[async_trait]
impl PageDom for CdpDom {
    async fn install_observer(&self) -> AppResult<()> {
        let ok: bool = self.eval_as(self.bootstrap.clone()).await?;
        if !ok {
            return Err(AppError::unexpected_eval_result(
                "install_observer",
                "引导脚本未返回 true",
            ));
        }
        Ok(())
    }

    async fn disconnect_observer(&self) -> AppResult<()> {
        self.eval("window.__subtran ? window.__subtran.disconnect() : true")
            .await?;
        Ok(())
    }

    async fn drain_mutations(&self) -> AppResult<Vec<MutationRecord>> {
        self.eval_as("window.__subtran ? window.__subtran.drain() : []")
            .await
    }

    async fn caption_containers(&self) -> AppResult<Vec<NodeId>> {
        let ids: Vec<u64> = self
            .eval_as("window.__subtran ? window.__subtran.containers() : []")
            .await?;
        Ok(ids.into_iter().map(NodeId).collect())
    }

    async fn container_text_nodes(
        &self,
        container: NodeId,
        limit: usize,
    ) -> AppResult<Vec<TextNodeSnapshot>> {
        self.eval_as(format!(
            "window.__subtran ? window.__subtran.collectIn({}, {}) : []",
            container.0, limit
        ))
        .await
    }

    async fn fallback_text_nodes(&self, limit: usize) -> AppResult<Vec<TextNodeSnapshot>> {
        self.eval_as(format!(
            "window.__subtran ? window.__subtran.collectFallback({}) : []",
            limit
        ))
        .await
    }

    async fn node_text(&self, id: NodeId) -> AppResult<Option<String>> {
        self.eval_as(format!(
            "window.__subtran ? window.__subtran.nodeText({}) : null",
            id.0
        ))
        .await
    }

    async fn set_node_text(&self, id: NodeId, text: &str) -> AppResult<()> {
        let encoded = serde_json::to_string(text)?;
        let ok: bool = self
            .eval_as(format!(
                "window.__subtran ? window.__subtran.setNodeText({}, {}) : false",
                id.0, encoded
            ))
            .await?;
        if !ok {
            return Err(AppError::node_detached(id.0));
        }
        Ok(())
    }

    async fn flash_translation_indicator(&self, id: NodeId) -> AppResult<()> {
        self.eval(format!(
            "window.__subtran ? window.__subtran.flashIndicator({}) : false",
            id.0
        ))
        .await?;
        Ok(())
    }

    async fn show_notice(&self, title: &str, body: &str) -> AppResult<()> {
        let title = serde_json::to_string(title)?;
        let body = serde_json::to_string(body)?;
        self.eval(format!(
            "window.__subtran ? window.__subtran.showNotice({}, {}) : false",
            title, body
        ))
        .await?;
        Ok(())
    }
}

/// 把标签和 class 列表拼成一个组合选择器
fn combined_selector(labels: &[String], classes: &[String]) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|l| format!("[aria-label=\"{}\"]", l))
        .collect();
    parts.extend(classes.iter().map(|c| format!(".{}", c)));
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_selector() {
        let labels = vec!["Captions".to_string(), "Subtitles".to_string()];
        let classes = vec!["ZPyPXe".to_string()];
        assert_eq!(
            combined_selector(&labels, &classes),
            "[aria-label=\"Captions\"], [aria-label=\"Subtitles\"], .ZPyPXe"
        );
    }

    #[test]
    fn test_bootstrap_placeholders_are_replaced() {
        let config = Config::default();
        let page_less = BOOTSTRAP_JS
            .replace("__LABELS__", "[\"Captions\"]")
            .replace("__CLASSES__", "[]")
            .replace("__SELECTOR__", "\"x\"");
        assert!(!page_less.contains("__LABELS__"));
        assert!(!page_less.contains("__SELECTOR__"));
        // 配置里的默认选择器都要进引导脚本
        for class in &config.caption_classes {
            assert!(combined_selector(&config.caption_labels, &config.caption_classes)
                .contains(class));
        }
    }
}
