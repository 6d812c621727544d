//! Built-in keyword lists used by the classifier. All entries are lowercase.

pub const WORK_KEYWORDS: &[&str] = &[
    "договор",
    "смета",
    "бриф",
    "сделка",
    "roi",
    "kpi",
    "проект",
    "задача",
    "дедлайн",
    "отчет",
    "встреча",
    "созвон",
    "клиент",
    "разработка",
    "баг",
    "фича",
    "тестирование",
    "релиз",
    "маркетинг",
    "продажи",
    "аналитика",
    "бюджет",
    "стратегия",
    "презентация",
    "документ",
    "согласование",
    "план",
    "контракт",
    "оплата",
    "инвойс",
    "счет",
    "заказ",
    "поставка",
    "логистика",
    "производство",
    "качество",
    "сертификация",
    "лицензия",
    "патент",
    "инвестиции",
    "финансы",
    "отчетность",
    "аудит",
    "налог",
    "бухгалтерия",
    "hr",
    "рекрутинг",
    "обучение",
    "тренинг",
    "персонал",
    "зарплата",
    "it",
    "система",
    "сервер",
    "база данных",
    "api",
    "интеграция",
    "безопасность",
    "комплаенс",
    "регулирование",
    "лицензирование",
];

pub const PERSONAL_KEYWORDS: &[&str] = &[
    "привет",
    "как дела",
    "семья",
    "друзья",
    "отдых",
    "выходные",
    "покупки",
    "дом",
    "еда",
    "фильм",
    "книга",
    "спорт",
    "хобби",
    "погода",
    "настроение",
    "личный",
    "день рождения",
    "праздник",
    "отпуск",
    "путешествие",
    "здоровье",
    "болезнь",
    "лечение",
    "врач",
    "больница",
    "лекарство",
    "диета",
    "любовь",
    "отношения",
    "свадьба",
    "развод",
    "дети",
    "школа",
    "университет",
    "развлечения",
    "игра",
    "музыка",
    "концерт",
    "театр",
    "музей",
    "ресторан",
];
