/// 健康检查端点
pub async fn health() -> &'static str {
    "OK"
}
